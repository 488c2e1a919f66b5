use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::PlatformError;

type HmacSha256 = Hmac<Sha256>;

pub fn generate_device_secret() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn hmac_sha256_base64(data: &str, secret: &str) -> Result<String, PlatformError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PlatformError::Crypto(e.to_string()))?;
    mac.update(data.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison of two base64 signatures.
///
/// Both sides are decoded first; surrounding whitespace is ignored.
pub fn signatures_match(expected: &str, provided: &str) -> bool {
    let (Ok(expected), Ok(provided)) = (
        STANDARD.decode(expected.trim()),
        STANDARD.decode(provided.trim()),
    ) else {
        return false;
    };
    expected.as_slice().ct_eq(provided.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        let sig = hmac_sha256_base64("what do ya want for nothing?", "Jefe").unwrap();
        assert_eq!(sig, "W9zBRr9gdU5qBCQmCJV1x1oAPwidJzmDnexYuWTsOEM=");
    }

    #[test]
    fn test_signatures_match_rejects_tampering() {
        let sig = hmac_sha256_base64("2024-01-01|60|3|9", "secret").unwrap();
        let tampered = hmac_sha256_base64("2024-01-01|60|4|9", "secret").unwrap();
        let foreign = hmac_sha256_base64("2024-01-01|60|3|9", "other").unwrap();

        assert!(signatures_match(&sig, &sig));
        assert!(signatures_match(&sig, &format!(" {sig}\n")));
        assert!(!signatures_match(&sig, &tampered));
        assert!(!signatures_match(&sig, &foreign));
        assert!(!signatures_match(&sig, "not base64!"));
        assert!(!signatures_match(&sig, ""));
    }

    #[test]
    fn test_device_secrets_are_unique() {
        assert_ne!(generate_device_secret(), generate_device_secret());
    }
}
