//! `x-line-signature` computation and verification.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-line-signature";

/// Base64 HMAC-SHA256 of `body` keyed by the channel secret.
pub fn sign(body: &[u8], channel_secret: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(channel_secret).expect("HMAC can take key of any size");
    mac.update(body);
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Returns true only when `signature` is exactly the signature of `body`.
///
/// An absent header fails closed before any hashing.
pub fn verify(body: &[u8], signature: Option<&str>, channel_secret: &[u8]) -> bool {
    let Some(signature) = signature else {
        return false;
    };
    let expected = sign(body, channel_secret);
    constant_time_eq(&expected, signature)
}

fn constant_time_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    let mut diff = left_bytes.len() ^ right_bytes.len();
    let max_len = left_bytes.len().max(right_bytes.len());
    for index in 0..max_len {
        let l = left_bytes.get(index).copied().unwrap_or(0);
        let r = right_bytes.get(index).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::{constant_time_eq, sign, verify};

    #[test]
    fn sign_matches_known_hmac_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog"), base64.
        assert_eq!(
            sign(b"The quick brown fox jumps over the lazy dog", b"key"),
            "97yD9DBThCSxMpjmqm+xQ+9NWaFJRhdZl0edvC0aPNg="
        );
    }

    #[test]
    fn verify_accepts_own_signature() {
        let body = br#"{"destination":"U0","events":[]}"#;
        let secret = b"channel-secret";
        let signature = sign(body, secret);
        assert!(verify(body, Some(&signature), secret));
    }

    #[test]
    fn verify_rejects_tampering_and_wrong_secret() {
        let body = br#"{"events":[]}"#;
        let signature = sign(body, b"secret");
        assert!(!verify(br#"{"events":[{}]}"#, Some(&signature), b"secret"));
        assert!(!verify(body, Some(&signature), b"other-secret"));
        assert!(!verify(body, Some("invalid-signature"), b"secret"));
        assert!(!verify(body, Some(""), b"secret"));
    }

    #[test]
    fn verify_fails_closed_without_header() {
        assert!(!verify(b"{}", None, b"secret"));
    }

    #[test]
    fn signature_comparison_is_exact() {
        let body = b"payload";
        let signature = sign(body, b"secret");
        let padded = format!("{signature} ");
        let truncated = &signature[..signature.len() - 1];
        assert!(!verify(body, Some(&padded), b"secret"));
        assert!(!verify(body, Some(truncated), b"secret"));
        assert!(!verify(body, Some(&signature.to_lowercase()), b"secret"));
    }

    #[test]
    fn constant_time_eq_rejects_different_lengths_and_values() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abcd"));
        assert!(!constant_time_eq("abc", "abx"));
    }
}
