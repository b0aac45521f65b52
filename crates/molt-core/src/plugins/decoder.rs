//! Artifact authenticity recovery.
//!
//! The server wraps every artifact with its private key; only content that
//! can be recovered with the matching public key is accepted as genuine.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use super::error::PluginError;

/// Detached signature prepended to every artifact payload.
const SIGNATURE_LEN: usize = 64;

/// Recovers the authentic artifact content from a downloaded payload.
///
/// Injected into the registry at construction so hosts and tests can
/// substitute their own packaging scheme.
pub trait ArtifactDecoder: Send + Sync {
    fn decode(&self, public_key: &str, payload: &[u8]) -> Result<Vec<u8>, PluginError>;
}

/// Default decoder for the server's wire format: a 64-byte ed25519
/// signature over the content, followed by the content itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignedArtifactDecoder;

impl ArtifactDecoder for SignedArtifactDecoder {
    fn decode(&self, public_key: &str, payload: &[u8]) -> Result<Vec<u8>, PluginError> {
        if payload.len() < SIGNATURE_LEN {
            return Err(PluginError::Integrity(
                "payload shorter than signature header".into(),
            ));
        }
        let (sig_bytes, content) = payload.split_at(SIGNATURE_LEN);
        let signature = Signature::from_slice(sig_bytes)
            .map_err(|e| PluginError::Integrity(format!("invalid signature bytes: {e}")))?;
        let key = decode_verifying_key(public_key)?;
        key.verify(content, &signature)
            .map_err(|e| PluginError::Integrity(format!("signature verification failed: {e}")))?;
        Ok(content.to_vec())
    }
}

/// Accepts the raw 32-byte key as base64, with or without PEM armor lines.
fn decode_verifying_key(public_key: &str) -> Result<VerifyingKey, PluginError> {
    let stripped: String = public_key
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .map(str::trim)
        .collect();
    let raw = BASE64
        .decode(stripped.as_bytes())
        .map_err(|_| PluginError::Integrity("public key is not valid base64".into()))?;
    let raw: [u8; 32] = raw
        .try_into()
        .map_err(|_| PluginError::Integrity("public key must be 32 bytes".into()))?;
    VerifyingKey::from_bytes(&raw)
        .map_err(|e| PluginError::Integrity(format!("invalid ed25519 public key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer as _, SigningKey};

    fn signed_payload(key: &SigningKey, content: &[u8]) -> Vec<u8> {
        let signature = key.sign(content);
        let mut payload = signature.to_bytes().to_vec();
        payload.extend_from_slice(content);
        payload
    }

    #[test]
    fn recovers_signed_content() {
        let key = SigningKey::from_bytes(&[42u8; 32]);
        let public = BASE64.encode(key.verifying_key().to_bytes());
        let payload = signed_payload(&key, b"plugin archive bytes");

        let content = SignedArtifactDecoder
            .decode(&public, &payload)
            .expect("decode");
        assert_eq!(content, b"plugin archive bytes");
    }

    #[test]
    fn accepts_pem_armored_keys() {
        let key = SigningKey::from_bytes(&[42u8; 32]);
        let pem = format!(
            "-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n",
            BASE64.encode(key.verifying_key().to_bytes())
        );
        let payload = signed_payload(&key, b"content");

        let content = SignedArtifactDecoder.decode(&pem, &payload).expect("decode");
        assert_eq!(content, b"content");
    }

    #[test]
    fn rejects_tampered_content() {
        let key = SigningKey::from_bytes(&[42u8; 32]);
        let public = BASE64.encode(key.verifying_key().to_bytes());
        let mut payload = signed_payload(&key, b"original");
        let last = payload.len() - 1;
        payload[last] ^= 0xff;

        let err = SignedArtifactDecoder
            .decode(&public, &payload)
            .expect_err("tampered payload must fail");
        assert!(matches!(err, PluginError::Integrity(_)));
    }

    #[test]
    fn rejects_payload_without_signature_header() {
        let key = SigningKey::from_bytes(&[42u8; 32]);
        let public = BASE64.encode(key.verifying_key().to_bytes());

        let err = SignedArtifactDecoder
            .decode(&public, b"short")
            .expect_err("truncated payload must fail");
        assert!(matches!(err, PluginError::Integrity(_)));
    }

    #[test]
    fn rejects_foreign_signing_key() {
        let server_key = SigningKey::from_bytes(&[42u8; 32]);
        let attacker_key = SigningKey::from_bytes(&[9u8; 32]);
        let public = BASE64.encode(server_key.verifying_key().to_bytes());
        let payload = signed_payload(&attacker_key, b"malicious");

        let err = SignedArtifactDecoder
            .decode(&public, &payload)
            .expect_err("foreign signature must fail");
        assert!(matches!(err, PluginError::Integrity(_)));
    }
}
