//! HMAC-SHA256 payload signing shared by the notification pipeline and the
//! webhook delivery headers.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Sign `data` with `secret`, returning `sha256=<hex digest>`.
pub fn sign(secret: &str, data: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(data.as_bytes());
    format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a `sha256=<hex>` signature (prefix optional).
pub fn verify(secret: &str, data: &str, signature: &str) -> bool {
    let digest_hex = signature.strip_prefix(SIGNATURE_PREFIX).unwrap_or(signature);
    let Ok(digest) = hex::decode(digest_hex) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(data.as_bytes());
    mac.verify_slice(&digest).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc4231_case_two() {
        let signature = sign("Jefe", "what do ya want for nothing?");
        assert_eq!(
            signature,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_accepts_with_and_without_prefix() {
        let signature = sign("secret", "payload");
        assert!(verify("secret", "payload", &signature));
        let bare = signature.strip_prefix("sha256=").expect("prefix");
        assert!(verify("secret", "payload", bare));
    }

    #[test]
    fn verify_rejects_tampering() {
        let signature = sign("secret", "payload");
        assert!(!verify("secret", "payload-changed", &signature));
        assert!(!verify("other-secret", "payload", &signature));
        assert!(!verify("secret", "payload", "sha256=not-hex"));
    }
}
