//! Authenticity checking with detached signatures.

use std::fmt;

use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, Verifier as _, VerifyingKey};
use tracing::info;

use crate::core::{Result, UpdateError};
use crate::verify::{Verifier, VerifierInput};

/// Encoding of the configured public keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    /// PEM-encoded SubjectPublicKeyInfo.
    Pem,
}

/// Signature algorithm of the configured public keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Ed25519 as per RFC 8032.
    Ed25519,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ed25519 => f.write_str("Ed25519"),
        }
    }
}

/// Verifies a detached signature over a message file.
///
/// Both the message and the digest (signature) file must be part of the
/// downloaded file set; the verifier declares them as required so the
/// downloader fetches them before the primary artifact. The signature
/// must validate under at least one of the supplied public keys, which
/// allows key rotation windows where releases are signed with either
/// the old or the new key.
pub struct MessageDigestVerifier {
    message_filename: String,
    digest_filename: String,
    key_format: KeyFormat,
    key_type: KeyType,
    encoded_public_keys: Vec<String>,
}

impl MessageDigestVerifier {
    /// Creates a verifier for a signature in `digest_filename` over the
    /// bytes of `message_filename`.
    ///
    /// `encoded_public_keys` holds one or more public keys in the given
    /// format; the caller is responsible for obtaining them from a
    /// trustworthy place (typically compiled into the application).
    pub fn new(
        message_filename: impl Into<String>,
        digest_filename: impl Into<String>,
        key_format: KeyFormat,
        key_type: KeyType,
        encoded_public_keys: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            message_filename: message_filename.into(),
            digest_filename: digest_filename.into(),
            key_format,
            key_type,
            encoded_public_keys: encoded_public_keys.into_iter().collect(),
        }
    }

    fn decode_keys(&self) -> Result<Vec<VerifyingKey>> {
        if self.encoded_public_keys.is_empty() {
            return Err(UpdateError::misconfigured(
                "no public keys configured for signature verification",
            ));
        }
        self.encoded_public_keys
            .iter()
            .map(|encoded| match (self.key_format, self.key_type) {
                (KeyFormat::Pem, KeyType::Ed25519) => VerifyingKey::from_public_key_pem(encoded)
                    .map_err(|err| {
                        UpdateError::misconfigured(format!(
                            "cannot decode {} public key: {err}",
                            self.key_type
                        ))
                    }),
            })
            .collect()
    }
}

impl Verifier for MessageDigestVerifier {
    fn required_files(&self) -> Vec<String> {
        vec![self.message_filename.clone(), self.digest_filename.clone()]
    }

    fn verify(&self, input: &VerifierInput<'_>) -> Result<()> {
        // A key that does not decode is a configuration error, never a
        // signature failure, regardless of whether another key would
        // have verified.
        let keys = self.decode_keys()?;

        let message = input.files.get(&self.message_filename).ok_or_else(|| {
            UpdateError::misconfigured(format!(
                "message file {} was not downloaded",
                self.message_filename
            ))
        })?;
        let digest = input.files.get(&self.digest_filename).ok_or_else(|| {
            UpdateError::misconfigured(format!(
                "signature file {} was not downloaded",
                self.digest_filename
            ))
        })?;

        let signature_bytes = digest.read()?;
        let signature = Signature::from_slice(&signature_bytes).map_err(|_| {
            UpdateError::verification(format!(
                "malformed {} signature in {}",
                self.key_type, self.digest_filename
            ))
        })?;
        let message_bytes = message.read()?;

        if keys
            .iter()
            .any(|key| key.verify(&message_bytes, &signature).is_ok())
        {
            info!("file authenticity OK, {} signature matches", self.key_type);
            Ok(())
        } else {
            Err(UpdateError::verification(format!(
                "invalid {} signature over {}",
                self.key_type, self.message_filename
            )))
        }
    }
}
