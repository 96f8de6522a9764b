//! Generate seed corpus for fuzzing

use pharkit::{BuildOptions, Builder, Compression, SignatureAlgorithm, SourceFile};
use std::fs;
use std::path::Path;

fn seed(dir: &Path, name: &str, options: BuildOptions, files: Vec<SourceFile>) -> pharkit::Result<()> {
    let path = dir.join(name);
    Builder::new(options).build(files, &path)?;
    println!("generated: {}", path.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let corpus_dir = Path::new("fuzz/corpus/fuzz_archive_parse");
    fs::create_dir_all(corpus_dir)?;

    seed(corpus_dir, "seed_empty.phar", BuildOptions::default(), Vec::new())?;

    seed(
        corpus_dir,
        "seed_single.phar",
        BuildOptions::default(),
        vec![SourceFile::from_bytes("index.php", "<?php echo 'hi';")],
    )?;

    seed(
        corpus_dir,
        "seed_deflate.phar",
        BuildOptions {
            alias: Some("seed.phar".into()),
            compression: Compression::Deflate,
            timestamp: Some(0),
            ..Default::default()
        },
        vec![
            SourceFile::from_bytes("src/a.php", "<?php\n".repeat(64)),
            SourceFile::from_bytes("data.bin", vec![0x5A; 4096]),
        ],
    )?;

    for algorithm in [SignatureAlgorithm::Md5, SignatureAlgorithm::Sha1, SignatureAlgorithm::Sha512] {
        seed(
            corpus_dir,
            &format!("seed_{}.phar", algorithm),
            BuildOptions {
                algorithm,
                ..Default::default()
            },
            vec![SourceFile::from_bytes("a.txt", "a")],
        )?;
    }

    Ok(())
}
