#![no_main]

use libfuzzer_sys::fuzz_target;
use pharkit::{ArchiveReader, TimestampNormalizer};

fuzz_target!(|data: &[u8]| {
    // Parsing must never panic, whatever the input
    let reader = match ArchiveReader::from_bytes(data.to_vec()) {
        Ok(r) => r,
        Err(_) => return,
    };

    let _ = reader.inspect();
    let _ = reader.verify();

    let files: Vec<String> = reader.list_files().to_vec();
    for file in &files {
        let _ = reader.read_file(file);
    }

    let _ = reader.contains("");
    let _ = reader.contains("../../../etc/passwd");

    // A parsed archive can always be re-stamped
    let mut bytes = data.to_vec();
    let _ = TimestampNormalizer::new(0).normalize(&mut bytes);
});
