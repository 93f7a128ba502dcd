use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use jwt_simple::prelude::*;
use rand::rngs::OsRng;

use super::{OfflineClaims, SigningError, TOKEN_ISSUER};

/// Generate a new Ed25519 key pair.
/// Returns (base64 of the 64-byte keypair, base64 of the 32-byte public key).
pub fn generate_keypair() -> (String, String) {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();

    let private_b64 = BASE64.encode(signing_key.to_keypair_bytes());
    let public_b64 = BASE64.encode(verifying_key.to_bytes());

    (private_b64, public_b64)
}

/// Decode a base64 private key. Accepts a 64-byte keypair (seed followed by
/// public key) or a bare 32-byte seed.
pub fn decode_signing_key(private_key_b64: &str) -> Result<SigningKey, SigningError> {
    let bytes = BASE64
        .decode(private_key_b64.trim())
        .map_err(|e| SigningError::SigningUnavailable(format!("invalid key encoding: {}", e)))?;

    match bytes.len() {
        32 => {
            let seed: [u8; 32] = bytes
                .try_into()
                .map_err(|_| SigningError::SigningUnavailable("failed to convert key bytes".into()))?;
            Ok(SigningKey::from_bytes(&seed))
        }
        64 => {
            let keypair: [u8; 64] = bytes
                .try_into()
                .map_err(|_| SigningError::SigningUnavailable("failed to convert key bytes".into()))?;
            SigningKey::from_keypair_bytes(&keypair)
                .map_err(|e| SigningError::SigningUnavailable(format!("invalid key pair: {}", e)))
        }
        n => Err(SigningError::SigningUnavailable(format!(
            "invalid private key length: {} bytes",
            n
        ))),
    }
}

/// Base64 public key matching a base64 private key.
pub fn derive_public_key(private_key_b64: &str) -> Result<String, SigningError> {
    let signing_key = decode_signing_key(private_key_b64)?;
    Ok(BASE64.encode(signing_key.verifying_key().to_bytes()))
}

/// Token-signing form of a decoded key. Build it once and share it.
pub fn token_key_pair(signing_key: &SigningKey) -> Result<Ed25519KeyPair, SigningError> {
    Ed25519KeyPair::from_bytes(&signing_key.to_keypair_bytes())
        .map_err(|e| SigningError::SigningUnavailable(format!("failed to create key pair: {}", e)))
}

/// Sign the outcome of a license check.
///
/// `expires_at` is a unix timestamp; when absent the token carries no `exp`
/// claim and never expires.
pub fn sign_offline_token(
    key_pair: &Ed25519KeyPair,
    license_key: &str,
    expires_at: Option<i64>,
    valid: bool,
    features: &[String],
) -> Result<String, SigningError> {
    let custom = OfflineClaims {
        valid,
        features: features.to_vec(),
    };

    let mut claims = Claims::with_custom_claims(custom, Duration::from_secs(0))
        .with_issuer(TOKEN_ISSUER)
        .with_subject(license_key);
    claims.expires_at = expires_at.map(|exp| Duration::from_secs(exp.max(0) as u64));

    key_pair
        .sign(claims)
        .map_err(|e| SigningError::Sign(e.to_string()))
}

/// Verify an offline token against a base64 public key and return its claims.
pub fn verify_offline_token(
    token: &str,
    public_key_b64: &str,
) -> Result<JWTClaims<OfflineClaims>, SigningError> {
    let public_bytes = BASE64
        .decode(public_key_b64.trim())
        .map_err(|e| SigningError::SigningUnavailable(format!("invalid public key encoding: {}", e)))?;

    let key_bytes: [u8; 32] = public_bytes
        .try_into()
        .map_err(|_| SigningError::SigningUnavailable("invalid public key length".into()))?;

    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| SigningError::SigningUnavailable(format!("invalid public key: {}", e)))?;

    let public_key = Ed25519PublicKey::from_bytes(&verifying_key.to_bytes())
        .map_err(|e| SigningError::SigningUnavailable(format!("failed to create public key: {}", e)))?;

    let claims = public_key
        .verify_token::<OfflineClaims>(token, None)
        .map_err(|e| SigningError::Verify(e.to_string()))?;

    if claims.issuer.as_deref() != Some(TOKEN_ISSUER) {
        return Err(SigningError::Verify("unexpected issuer".into()));
    }

    Ok(claims)
}

/// Detached signature over arbitrary bytes, base64 encoded.
pub fn sign_bytes(signing_key: &SigningKey, message: &[u8]) -> String {
    BASE64.encode(signing_key.sign(message).to_bytes())
}
