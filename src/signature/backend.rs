//! Asymmetric signing backends
//!
//! Backends are compiled in through cargo features and probed once into a
//! [`BackendRegistry`]. Callers resolve a backend per algorithm up front, so
//! nothing downstream depends on which crates happened to be available.

use super::SignatureAlgorithm;
use crate::error::{PharError, Result};
use std::fmt;
use std::sync::Arc;

/// Explicit error state shared by cryptographic calls
///
/// Backends append diagnostics here instead of to any process-wide queue.
/// Verification clears it first so that leftovers from an unrelated earlier
/// call are never attributed to the current check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CryptoErrorQueue {
    entries: Vec<String>,
}

impl CryptoErrorQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.entries.push(message.into());
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn last(&self) -> Option<&str> {
        self.entries.last().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

/// A provider of public-key signatures
pub trait AsymmetricBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn supports(&self, algorithm: SignatureAlgorithm) -> bool;

    /// Sign `data` with a PEM encoded private key
    fn sign(&self, algorithm: SignatureAlgorithm, private_key_pem: &str, data: &[u8])
        -> Result<Vec<u8>>;

    /// PEM (SubjectPublicKeyInfo) public half of a PEM private key
    fn public_key_pem(&self, private_key_pem: &str) -> Result<String>;

    /// Check `signature` over `data`
    ///
    /// Returns `Ok(false)` for a well-formed key with a non-matching signature
    /// and an error only when the key itself cannot be used.
    fn verify(
        &self,
        algorithm: SignatureAlgorithm,
        public_key_pem: &str,
        data: &[u8],
        signature: &[u8],
        errors: &mut CryptoErrorQueue,
    ) -> Result<bool>;
}

/// Backends compiled into this build, in preference order
#[derive(Debug, Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn AsymmetricBackend>>,
}

impl BackendRegistry {
    /// Collect every backend enabled at compile time
    pub fn probe() -> Self {
        #[allow(unused_mut)]
        let mut backends: Vec<Arc<dyn AsymmetricBackend>> = Vec::new();

        #[cfg(feature = "rsa-backend")]
        backends.push(Arc::new(RsaBackend));

        #[cfg(feature = "ed25519-backend")]
        backends.push(Arc::new(Ed25519Backend));

        tracing::debug!(
            backends = ?backends.iter().map(|b| b.name()).collect::<Vec<_>>(),
            "probed crypto backends"
        );
        Self { backends }
    }

    /// Registry with an explicit candidate list
    pub fn with_backends(backends: Vec<Arc<dyn AsymmetricBackend>>) -> Self {
        Self { backends }
    }

    /// Registry without any backend; only digest algorithms remain usable
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// First backend able to handle `algorithm`
    pub fn select(&self, algorithm: SignatureAlgorithm) -> Result<Arc<dyn AsymmetricBackend>> {
        self.backends
            .iter()
            .find(|b| b.supports(algorithm))
            .cloned()
            .ok_or_else(|| PharError::NoCryptoBackend(algorithm.name().to_string()))
    }
}

#[cfg(feature = "rsa-backend")]
pub use self::rsa_backend::RsaBackend;

#[cfg(feature = "rsa-backend")]
mod rsa_backend {
    use super::{AsymmetricBackend, CryptoErrorQueue};
    use crate::error::{PharError, Result};
    use crate::signature::SignatureAlgorithm;
    use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
    use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
    use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePublicKey, LineEnding};
    use rsa::signature::{SignatureEncoding, Signer, Verifier};
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use sha1::Sha1;
    use sha2::{Sha256, Sha512};

    /// RSA PKCS#1 v1.5, compatible with the runtime's OpenSSL signatures
    #[derive(Debug, Clone, Copy, Default)]
    pub struct RsaBackend;

    fn private_key(pem: &str) -> Result<RsaPrivateKey> {
        RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| PharError::KeyMaterial(format!("invalid RSA private key: {}", e)))
    }

    fn public_key(pem: &str) -> Result<RsaPublicKey> {
        RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| PharError::KeyMaterial(format!("invalid RSA public key: {}", e)))
    }

    impl AsymmetricBackend for RsaBackend {
        fn name(&self) -> &'static str {
            "rsa"
        }

        fn supports(&self, algorithm: SignatureAlgorithm) -> bool {
            matches!(
                algorithm,
                SignatureAlgorithm::OpenSsl
                    | SignatureAlgorithm::OpenSslSha256
                    | SignatureAlgorithm::OpenSslSha512
            )
        }

        fn sign(
            &self,
            algorithm: SignatureAlgorithm,
            private_key_pem: &str,
            data: &[u8],
        ) -> Result<Vec<u8>> {
            let key = private_key(private_key_pem)?;
            let signature = match algorithm {
                SignatureAlgorithm::OpenSsl => SigningKey::<Sha1>::new(key).try_sign(data),
                SignatureAlgorithm::OpenSslSha256 => SigningKey::<Sha256>::new(key).try_sign(data),
                SignatureAlgorithm::OpenSslSha512 => SigningKey::<Sha512>::new(key).try_sign(data),
                other => return Err(PharError::NoCryptoBackend(other.name().to_string())),
            }
            .map_err(|e| PharError::SigningFailed(e.to_string()))?;
            Ok(signature.to_vec())
        }

        fn public_key_pem(&self, private_key_pem: &str) -> Result<String> {
            let key = private_key(private_key_pem)?;
            key.to_public_key()
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| PharError::KeyMaterial(e.to_string()))
        }

        fn verify(
            &self,
            algorithm: SignatureAlgorithm,
            public_key_pem: &str,
            data: &[u8],
            signature: &[u8],
            errors: &mut CryptoErrorQueue,
        ) -> Result<bool> {
            let key = public_key(public_key_pem)?;
            let signature = match Signature::try_from(signature) {
                Ok(signature) => signature,
                Err(e) => {
                    errors.push(format!("rsa: malformed signature: {}", e));
                    return Ok(false);
                }
            };

            let outcome = match algorithm {
                SignatureAlgorithm::OpenSsl => VerifyingKey::<Sha1>::new(key).verify(data, &signature),
                SignatureAlgorithm::OpenSslSha256 => {
                    VerifyingKey::<Sha256>::new(key).verify(data, &signature)
                }
                SignatureAlgorithm::OpenSslSha512 => {
                    VerifyingKey::<Sha512>::new(key).verify(data, &signature)
                }
                other => return Err(PharError::NoCryptoBackend(other.name().to_string())),
            };

            match outcome {
                Ok(()) => Ok(true),
                Err(e) => {
                    errors.push(format!("rsa: {}", e));
                    Ok(false)
                }
            }
        }
    }
}

#[cfg(feature = "ed25519-backend")]
pub use self::ed25519_backend::Ed25519Backend;

#[cfg(feature = "ed25519-backend")]
mod ed25519_backend {
    use super::{AsymmetricBackend, CryptoErrorQueue};
    use crate::error::{PharError, Result};
    use crate::signature::SignatureAlgorithm;
    use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
    use ed25519_dalek::pkcs8::spki::{DecodePublicKey, EncodePublicKey};
    use ed25519_dalek::pkcs8::DecodePrivateKey;
    use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

    /// Ed25519 signatures
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Ed25519Backend;

    fn signing_key(pem: &str) -> Result<SigningKey> {
        SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| PharError::KeyMaterial(format!("invalid Ed25519 private key: {}", e)))
    }

    impl AsymmetricBackend for Ed25519Backend {
        fn name(&self) -> &'static str {
            "ed25519"
        }

        fn supports(&self, algorithm: SignatureAlgorithm) -> bool {
            algorithm == SignatureAlgorithm::Ed25519
        }

        fn sign(
            &self,
            algorithm: SignatureAlgorithm,
            private_key_pem: &str,
            data: &[u8],
        ) -> Result<Vec<u8>> {
            if !self.supports(algorithm) {
                return Err(PharError::NoCryptoBackend(algorithm.name().to_string()));
            }
            let key = signing_key(private_key_pem)?;
            Ok(key.sign(data).to_bytes().to_vec())
        }

        fn public_key_pem(&self, private_key_pem: &str) -> Result<String> {
            signing_key(private_key_pem)?
                .verifying_key()
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| PharError::KeyMaterial(e.to_string()))
        }

        fn verify(
            &self,
            algorithm: SignatureAlgorithm,
            public_key_pem: &str,
            data: &[u8],
            signature: &[u8],
            errors: &mut CryptoErrorQueue,
        ) -> Result<bool> {
            if !self.supports(algorithm) {
                return Err(PharError::NoCryptoBackend(algorithm.name().to_string()));
            }
            let key = VerifyingKey::from_public_key_pem(public_key_pem)
                .map_err(|e| PharError::KeyMaterial(format!("invalid Ed25519 public key: {}", e)))?;
            let signature = match Signature::from_slice(signature) {
                Ok(signature) => signature,
                Err(e) => {
                    errors.push(format!("ed25519: malformed signature: {}", e));
                    return Ok(false);
                }
            };

            match key.verify(data, &signature) {
                Ok(()) => Ok(true),
                Err(e) => {
                    errors.push(format!("ed25519: {}", e));
                    Ok(false)
                }
            }
        }
    }
}
