//! Signature soundness: digests, RSA and Ed25519, and error classification

use pharkit::error::ErrorKind;
use pharkit::signature::{public_key_path, CryptoErrorQueue};
use pharkit::{
    ArchiveReader, ArchiveSigner, BackendRegistry, BuildOptions, Builder, PharError,
    SignatureAlgorithm, SignatureEngine, SourceFile,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn sources() -> Vec<SourceFile> {
    vec![
        SourceFile::from_bytes("index.php", "<?php require 'lib.php';").with_modified(1),
        SourceFile::from_bytes("lib.php", "<?php function lib() { return 42; }").with_modified(2),
        SourceFile::from_bytes("data.bin", vec![0xAB; 512]).with_modified(3),
    ]
}

fn build(dir: &Path, algorithm: SignatureAlgorithm, key: Option<PathBuf>) -> PathBuf {
    let output = dir.join(format!("{}.phar", algorithm));
    let options = BuildOptions {
        algorithm,
        private_key: key,
        ..Default::default()
    };
    Builder::new(options).build(sources(), &output).unwrap();
    output
}

/// Offsets inside the signed region whose corruption leaves the structure intact
fn tamper_offsets(bytes: &[u8]) -> Vec<usize> {
    let reader = ArchiveReader::from_bytes(bytes.to_vec()).unwrap();
    let manifest = reader.manifest();
    let lib = manifest.find("lib.php").unwrap();
    vec![
        0,
        lib.timestamp_offset(),
        lib.timestamp_offset() + 8,
        lib.data_offset,
        manifest.signature_start - 1,
    ]
}

fn assert_tamper_detected(path: &Path) {
    let original = std::fs::read(path).unwrap();
    for offset in tamper_offsets(&original) {
        let mut bytes = original.clone();
        bytes[offset] ^= 0x01;
        std::fs::write(path, &bytes).unwrap();

        let reader = ArchiveReader::open(path).unwrap();
        let err = reader.verify().unwrap_err();
        assert!(
            matches!(err, PharError::SignatureMismatch),
            "offset {}: {:?}",
            offset,
            err
        );
        assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
    }
    std::fs::write(path, &original).unwrap();
    ArchiveReader::open(path).unwrap().verify().unwrap();
}

#[test]
fn test_sha256_corrupted_entry_is_signature_mismatch() {
    let dir = TempDir::new().unwrap();
    let path = build(dir.path(), SignatureAlgorithm::Sha256, None);

    let mut bytes = std::fs::read(&path).unwrap();
    let offset = ArchiveReader::from_bytes(bytes.clone())
        .unwrap()
        .manifest()
        .find("data.bin")
        .unwrap()
        .data_offset;
    bytes[offset + 10] = 0x00;
    std::fs::write(&path, &bytes).unwrap();

    let reader = ArchiveReader::open(&path).unwrap();
    let err = reader.verify().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
    assert_ne!(err.kind(), ErrorKind::Corrupt);

    let status = std::process::Command::new(env!("CARGO_BIN_EXE_pharkit"))
        .arg("verify")
        .arg(&path)
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(3));
}

#[test]
fn test_every_digest_detects_tampering() {
    for algorithm in [
        SignatureAlgorithm::Md5,
        SignatureAlgorithm::Sha1,
        SignatureAlgorithm::Sha256,
        SignatureAlgorithm::Sha512,
    ] {
        let dir = TempDir::new().unwrap();
        let path = build(dir.path(), algorithm, None);
        ArchiveReader::open(&path).unwrap().verify().unwrap();
        assert_tamper_detected(&path);
    }
}

#[test]
fn test_signature_block_swap_is_mismatch() {
    let dir = TempDir::new().unwrap();
    let path = build(dir.path(), SignatureAlgorithm::Sha1, None);
    let mut bytes = std::fs::read(&path).unwrap();
    let start = ArchiveReader::from_bytes(bytes.clone())
        .unwrap()
        .manifest()
        .signature_start;
    bytes[start] ^= 0xFF;

    let err = ArchiveReader::from_bytes(bytes).unwrap().verify().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
}

#[cfg(feature = "rsa-backend")]
mod rsa_keys {
    use super::*;
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};
    use rsa::RsaPrivateKey;
    use std::sync::OnceLock;

    pub fn private_pem() -> &'static str {
        static KEY: OnceLock<String> = OnceLock::new();
        KEY.get_or_init(|| {
            let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
            key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string()
        })
    }

    #[test]
    fn test_rsa_sign_verify_and_tamper() {
        for algorithm in [
            SignatureAlgorithm::OpenSsl,
            SignatureAlgorithm::OpenSslSha256,
            SignatureAlgorithm::OpenSslSha512,
        ] {
            let dir = TempDir::new().unwrap();
            let key = dir.path().join("private.pem");
            std::fs::write(&key, private_pem()).unwrap();

            let path = build(dir.path(), algorithm, Some(key));
            let pubkey = public_key_path(&path);
            assert!(pubkey.exists());
            assert!(std::fs::read_to_string(&pubkey)
                .unwrap()
                .starts_with("-----BEGIN PUBLIC KEY-----"));

            let reader = ArchiveReader::open(&path).unwrap();
            assert_eq!(reader.signature().algorithm, algorithm);
            assert_eq!(reader.signature().signature.len(), 128);
            reader.verify().unwrap();
            assert_tamper_detected(&path);
        }
    }

    #[test]
    fn test_missing_or_invalid_public_key_is_key_error() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("private.pem");
        std::fs::write(&key, private_pem()).unwrap();
        let path = build(dir.path(), SignatureAlgorithm::OpenSslSha256, Some(key));
        let pubkey = public_key_path(&path);

        std::fs::write(&pubkey, "-----BEGIN PUBLIC KEY-----\nnot base64\n-----END PUBLIC KEY-----\n")
            .unwrap();
        let err = ArchiveReader::open(&path).unwrap().verify().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyMaterial);

        std::fs::remove_file(&pubkey).unwrap();
        let err = ArchiveReader::open(&path).unwrap().verify().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyMaterial);

        let status = std::process::Command::new(env!("CARGO_BIN_EXE_pharkit"))
            .arg("verify")
            .arg(&path)
            .status()
            .unwrap();
        assert_eq!(status.code(), Some(4));
    }

    #[test]
    fn test_stale_errors_are_cleared_before_verify() {
        let backends = BackendRegistry::probe();
        let signer = ArchiveSigner::new(
            SignatureAlgorithm::OpenSslSha256,
            Some(private_pem().to_string()),
            &backends,
        )
        .unwrap();
        let data = b"archive bytes".repeat(100);
        let block = signer.sign(&data).unwrap();
        let public_pem = signer.public_key_pem().unwrap().unwrap();

        let mut stale = CryptoErrorQueue::new();
        stale.push("error:0909006C:PEM routines:get_name:no start line");

        let mut engine =
            SignatureEngine::with_public_key(SignatureAlgorithm::OpenSslSha256, public_pem.clone(), &backends)
                .unwrap()
                .with_error_queue(stale);
        for chunk in data.chunks(7) {
            engine.update(chunk);
        }
        assert!(engine.verify(&block.signature).unwrap());
        assert!(engine.errors().is_empty());

        // A real failure is reported on its own
        let mut engine =
            SignatureEngine::with_public_key(SignatureAlgorithm::OpenSslSha256, public_pem, &backends)
                .unwrap();
        engine.update(b"different bytes");
        assert!(!engine.verify(&block.signature).unwrap());
        assert_eq!(engine.errors().len(), 1);
    }

    #[test]
    fn test_pkcs1_private_key_accepted() {
        use rsa::pkcs1::EncodeRsaPrivateKey;
        use rsa::pkcs8::DecodePrivateKey;

        let key = RsaPrivateKey::from_pkcs8_pem(private_pem()).unwrap();
        let pkcs1 = key.to_pkcs1_pem(LineEnding::LF).unwrap().to_string();
        let signer = ArchiveSigner::new(
            SignatureAlgorithm::OpenSsl,
            Some(pkcs1),
            &BackendRegistry::probe(),
        )
        .unwrap();
        assert_eq!(signer.sign(b"x").unwrap().signature.len(), 128);
    }
}

#[cfg(feature = "ed25519-backend")]
mod ed25519_keys {
    use super::*;
    use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
    use ed25519_dalek::pkcs8::EncodePrivateKey;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn private_pem() -> String {
        let key = SigningKey::generate(&mut OsRng);
        key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string()
    }

    #[test]
    fn test_ed25519_sign_verify_and_tamper() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("ed25519.pem");
        std::fs::write(&key, private_pem()).unwrap();

        let path = build(dir.path(), SignatureAlgorithm::Ed25519, Some(key));
        let reader = ArchiveReader::open(&path).unwrap();
        assert_eq!(reader.signature().algorithm, SignatureAlgorithm::Ed25519);
        assert_eq!(reader.signature().signature.len(), 64);
        reader.verify().unwrap();
        assert_tamper_detected(&path);
    }

    #[test]
    fn test_wrong_key_is_mismatch() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("ed25519.pem");
        std::fs::write(&key, private_pem()).unwrap();
        let path = build(dir.path(), SignatureAlgorithm::Ed25519, Some(key));

        let other = ArchiveSigner::new(
            SignatureAlgorithm::Ed25519,
            Some(private_pem()),
            &BackendRegistry::probe(),
        )
        .unwrap();
        std::fs::write(public_key_path(&path), other.public_key_pem().unwrap().unwrap()).unwrap();

        let err = ArchiveReader::open(&path).unwrap().verify().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureMismatch);
    }
}

#[test]
fn test_no_backend_is_reported() {
    let err = SignatureEngine::init(
        SignatureAlgorithm::OpenSsl,
        Some(Path::new("missing.pubkey")),
        &BackendRegistry::empty(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, PharError::NoCryptoBackend(_)));
}
