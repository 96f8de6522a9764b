//! Compression selection: deflate is only kept when it shrinks the payload

use pharkit::{ArchiveReader, BuildOptions, Builder, Compression, SourceFile};
use tempfile::TempDir;

fn build(compression: Compression, files: Vec<SourceFile>) -> ArchiveReader {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("compression.phar");
    let options = BuildOptions {
        compression,
        ..Default::default()
    };
    Builder::new(options).build(files, &output).unwrap();
    ArchiveReader::open(&output).unwrap()
}

#[test]
fn test_compression_choice_small_files() {
    let reader = build(
        Compression::Deflate,
        vec![
            SourceFile::from_bytes("tiny.txt", "Hi"),
            SourceFile::from_bytes("empty.txt", ""),
        ],
    );
    for path in ["tiny.txt", "empty.txt"] {
        let entry = reader.get_entry(path).unwrap();
        assert_eq!(entry.compression(), Compression::None);
        assert_eq!(entry.compressed_size, entry.uncompressed_size);
    }
    assert_eq!(reader.read_file("empty.txt").unwrap(), b"");
}

#[test]
fn test_compression_effectiveness_text() {
    let text = "<?php\nfunction hello() { return 'hello world'; }\n".repeat(200);
    let reader = build(Compression::Deflate, vec![SourceFile::from_bytes("a.php", text.clone())]);
    let entry = reader.get_entry("a.php").unwrap();
    assert_eq!(entry.compression(), Compression::Deflate);
    assert!(entry.compressed_size * 10 < entry.uncompressed_size);
    assert_eq!(entry.crc32, crc32fast::hash(text.as_bytes()));
    assert_eq!(reader.read_file("a.php").unwrap(), text.as_bytes());
}

#[test]
fn test_no_compression_requested() {
    let text = "aaaa".repeat(1000);
    let reader = build(Compression::None, vec![SourceFile::from_bytes("a.txt", text.clone())]);
    let entry = reader.get_entry("a.txt").unwrap();
    assert_eq!(entry.compression(), Compression::None);
    assert_eq!(reader.read_raw("a.txt").unwrap(), text.as_bytes());
    assert_eq!(reader.inspect().flags & pharkit::archive::FLAG_DEFLATE, 0);
}

#[test]
fn test_compression_parse() {
    assert_eq!(Compression::parse("deflate").unwrap(), Compression::Deflate);
    assert_eq!(Compression::parse("GZ").unwrap(), Compression::Deflate);
    assert_eq!(Compression::parse("none").unwrap(), Compression::None);
    assert!(Compression::parse("bzip2").is_err());
}
