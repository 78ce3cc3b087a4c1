//! Ed25519 Identität
//!
//! Jeder Talky-Client besitzt ein Ed25519 Schlüsselpaar. Der Public Key wird
//! bei der Registrierung übertragen, jede Client-Nachricht wird über ihre
//! kanonische JSON-Form signiert.
//!
//! ## Verwendung
//! ```rust,ignore
//! let keypair = KeyPair::load_or_create(&config.identity_path())?;
//! let signature = keypair.sign_message(&payload);
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fs;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum KeyPairError {
    #[error("Identity file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode key: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid public key")]
    InvalidPublicKey,
}

// ============================================================================
// KEYPAIR
// ============================================================================

#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Lädt die Identität aus `path` oder legt eine neue an (Dateirechte 0600)
    pub fn load_or_create(path: &Path) -> Result<Self, KeyPairError> {
        if path.exists() {
            tracing::info!("Loading identity from {:?}", path);
            Self::load_from_file(path)
        } else {
            tracing::info!("Creating new identity at {:?}", path);
            let keypair = Self::generate();
            keypair.save_to_file(path)?;
            Ok(keypair)
        }
    }

    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    fn load_from_file(path: &Path) -> Result<Self, KeyPairError> {
        let encoded = fs::read_to_string(path)?;
        let bytes = BASE64.decode(encoded.trim())?;

        let key_bytes: [u8; 32] =
            bytes
                .try_into()
                .map_err(|bytes: Vec<u8>| KeyPairError::InvalidKeyLength {
                    expected: 32,
                    actual: bytes.len(),
                })?;

        Ok(Self {
            signing_key: SigningKey::from_bytes(&key_bytes),
        })
    }

    fn save_to_file(&self, path: &Path) -> Result<(), KeyPairError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, BASE64.encode(self.signing_key.to_bytes()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.verifying_key().to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Signiert eine Client-Nachricht, Ergebnis ist Base64
    pub fn sign_message(&self, payload: &serde_json::Value) -> String {
        let signature = self.sign(Self::canonical_payload(payload).as_bytes());
        BASE64.encode(signature.to_bytes())
    }

    /// Prüft die Signatur einer Nachricht gegen einen Base64 Public Key
    pub fn verify_message(
        public_key_base64: &str,
        payload: &serde_json::Value,
        signature_base64: &str,
    ) -> Result<bool, KeyPairError> {
        let key_bytes = BASE64.decode(public_key_base64)?;
        let key_bytes: [u8; 32] =
            key_bytes
                .try_into()
                .map_err(|bytes: Vec<u8>| KeyPairError::InvalidKeyLength {
                    expected: 32,
                    actual: bytes.len(),
                })?;
        let verifying_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| KeyPairError::InvalidPublicKey)?;

        let signature_bytes = BASE64.decode(signature_base64)?;
        let Ok(signature) = Signature::from_slice(&signature_bytes) else {
            return Ok(false);
        };

        Ok(verifying_key
            .verify(Self::canonical_payload(payload).as_bytes(), &signature)
            .is_ok())
    }

    /// JSON mit alphabetisch sortierten Keys, ohne `signature`
    pub fn canonical_payload(payload: &serde_json::Value) -> String {
        Self::sorted(payload).to_string()
    }

    fn sorted(value: &serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let mut keys: Vec<_> = map.keys().filter(|k| *k != "signature").collect();
                keys.sort();

                let mut sorted = serde_json::Map::new();
                for key in keys {
                    sorted.insert(key.clone(), Self::sorted(&map[key]));
                }
                serde_json::Value::Object(sorted)
            }
            other => other.clone(),
        }
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_base64())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_key_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("talky-test-{}-{}", name, uuid::Uuid::new_v4()))
            .join("identity.key")
    }

    #[test]
    fn test_load_or_create_is_stable() {
        let path = temp_key_path("identity");

        let created = KeyPair::load_or_create(&path).unwrap();
        let loaded = KeyPair::load_or_create(&path).unwrap();
        assert_eq!(created.public_key_base64(), loaded.public_key_base64());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupt_identity_is_rejected() {
        let path = temp_key_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, BASE64.encode([1u8; 16])).unwrap();

        let err = KeyPair::load_or_create(&path).unwrap_err();
        assert!(matches!(
            err,
            KeyPairError::InvalidKeyLength {
                expected: 32,
                actual: 16
            }
        ));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_canonical_payload_ignores_order_and_signature() {
        let a = serde_json::json!({"type": "heartbeat", "peerId": "p", "timestamp": 1});
        let b = serde_json::json!({"timestamp": 1, "signature": "x", "peerId": "p", "type": "heartbeat"});

        assert_eq!(KeyPair::canonical_payload(&a), KeyPair::canonical_payload(&b));
        assert_eq!(
            KeyPair::canonical_payload(&a),
            r#"{"peerId":"p","timestamp":1,"type":"heartbeat"}"#
        );
    }

    #[test]
    fn test_sign_and_verify_message() {
        let keypair = KeyPair::generate();
        let payload = serde_json::json!({
            "type": "register",
            "username": "alice",
            "publicKey": keypair.public_key_base64(),
            "timestamp": 1234567890
        });

        let signature = keypair.sign_message(&payload);
        assert_eq!(signature.len(), 88);
        assert!(KeyPair::verify_message(&keypair.public_key_base64(), &payload, &signature).unwrap());

        let mut tampered = payload.clone();
        tampered["username"] = "mallory".into();
        assert!(
            !KeyPair::verify_message(&keypair.public_key_base64(), &tampered, &signature).unwrap()
        );
    }
}
