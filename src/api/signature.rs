// src/api/signature.rs

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Headers the payment vendor has used for the body signature, in lookup order.
pub const SIGNATURE_HEADERS: [&str; 3] = ["webhook-signature", "dodo-signature", "x-dodo-signature"];

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature")]
    Missing,
    #[error("signature is not valid hex")]
    Malformed,
    #[error("signature mismatch")]
    Mismatch,
}

/// HMAC-SHA256 of `data` in lowercase hex.
pub fn sign_hmac_sha256_hex(secret: &str, data: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Checks a hex HMAC-SHA256 of the raw body. An optional `sha256=` prefix is
/// accepted. The digest comparison is constant-time.
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> Result<(), SignatureError> {
    let provided = header.trim();
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    if provided.is_empty() {
        return Err(SignatureError::Missing);
    }

    let provided = hex::decode(provided).map_err(|_| SignatureError::Malformed)?;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    mac.verify_slice(&provided).map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_own_signature_with_or_without_prefix() {
        let body = br#"{"type":"checkout.session.completed"}"#;
        let sig = sign_hmac_sha256_hex("whsec", body);
        assert_eq!(verify_signature("whsec", body, &sig), Ok(()));
        assert_eq!(verify_signature("whsec", body, &format!("sha256={sig}")), Ok(()));
        assert_eq!(verify_signature("whsec", body, &sig.to_uppercase()), Ok(()));
    }

    #[test]
    fn rejects_tampered_body_and_wrong_secret() {
        let body = br#"{"plan":"pro"}"#;
        let sig = sign_hmac_sha256_hex("whsec", body);
        assert_eq!(
            verify_signature("whsec", br#"{"plan":"pro","x":1}"#, &sig),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(verify_signature("other", body, &sig), Err(SignatureError::Mismatch));
    }

    #[test]
    fn rejects_empty_and_non_hex() {
        assert_eq!(verify_signature("s", b"{}", "  "), Err(SignatureError::Missing));
        assert_eq!(verify_signature("s", b"{}", "zz"), Err(SignatureError::Malformed));
        // wrong length digest is a mismatch, not a panic
        assert_eq!(verify_signature("s", b"{}", "abcd"), Err(SignatureError::Mismatch));
    }
}
