//! Service key pair
//!
//! Exactly one RSA key pair identifies every local actor. It is loaded once
//! at startup and never changes afterwards.

use std::path::Path;

use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::error::AppError;

/// Read-only RSA key pair
pub struct KeyStore {
    private_key: RsaPrivateKey,
    public_key_pem: String,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("public_key_pem", &self.public_key_pem)
            .finish_non_exhaustive()
    }
}

impl KeyStore {
    /// Load both PEM files.
    ///
    /// # Errors
    /// Fails if either file is missing or does not hold an RSA key. The
    /// caller treats this as fatal: the service cannot sign or publish
    /// actors without it.
    pub fn load(private_key_path: &Path, public_key_path: &Path) -> Result<Self, AppError> {
        let private_pem = std::fs::read_to_string(private_key_path).map_err(|e| {
            AppError::KeyStore(format!(
                "Failed to read private key {}: {}",
                private_key_path.display(),
                e
            ))
        })?;
        let public_pem = std::fs::read_to_string(public_key_path).map_err(|e| {
            AppError::KeyStore(format!(
                "Failed to read public key {}: {}",
                public_key_path.display(),
                e
            ))
        })?;

        let store = Self::from_pem(&private_pem, &public_pem)?;
        tracing::info!(
            private_key = %private_key_path.display(),
            public_key = %public_key_path.display(),
            "Key pair loaded"
        );
        Ok(store)
    }

    /// Build from PEM text (PKCS#8 or PKCS#1 private key, SPKI or PKCS#1
    /// public key).
    pub fn from_pem(private_pem: &str, public_pem: &str) -> Result<Self, AppError> {
        let private_key = parse_private_key_pem(private_pem)?;
        let public_key = parse_public_key_pem(public_pem)?;

        if RsaPublicKey::from(&private_key) != public_key {
            return Err(AppError::KeyStore(
                "Public key does not belong to the private key".to_string(),
            ));
        }

        Ok(Self {
            private_key,
            public_key_pem: public_pem.trim().to_string() + "\n",
        })
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// Public key exactly as published in actor documents
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }
}

pub(crate) fn parse_private_key_pem(pem: &str) -> Result<RsaPrivateKey, AppError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| AppError::KeyStore(format!("Invalid private key: {}", e)))
}

pub(crate) fn parse_public_key_pem(pem: &str) -> Result<RsaPublicKey, AppError> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| AppError::KeyStore(format!("Invalid public key: {}", e)))
}
