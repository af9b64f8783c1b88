// siwe-auth/src/validate.rs
//! Cheap, local checks run before any signature work.

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use url::Url;

use crate::error::RejectReason;
use crate::message::SiweMessage;

/// Check `not_before <= now < expiration_time`, treating absent bounds as open.
pub fn check_time_window(message: &SiweMessage, now: DateTime<Utc>) -> Result<(), RejectReason> {
    if let Some(not_before) = message.not_before {
        if now < not_before {
            return Err(RejectReason::NotYetValid);
        }
    }
    if let Some(expiration_time) = message.expiration_time {
        if now >= expiration_time {
            return Err(RejectReason::Expired);
        }
    }
    Ok(())
}

/// Exact match of the signed domain against the relying party's own.
///
/// No wildcard or subdomain matching.
pub fn check_domain(domain: &str, expected_domain: &str) -> Result<(), RejectReason> {
    if domain == expected_domain {
        Ok(())
    } else {
        Err(RejectReason::DomainMismatch)
    }
}

/// Compare the signed nonce with the session's outstanding challenge.
///
/// A session without a challenge never matches.
pub fn check_nonce(nonce: &str, session_nonce: Option<&str>) -> Result<(), RejectReason> {
    match session_nonce {
        Some(expected) if bool::from(nonce.as_bytes().ct_eq(expected.as_bytes())) => Ok(()),
        _ => Err(RejectReason::NonceMismatch),
    }
}

/// Derive the expected sign-in domain from the relying party's canonical URL.
///
/// This is the URL authority: the lowercased host, plus the port only when it
/// is not the scheme's default.
pub fn domain_from_url(canonical_url: &str) -> Option<String> {
    let url = Url::parse(canonical_url).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use chrono::{Duration, TimeZone};

    fn claim() -> SiweMessage {
        let address: Address = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".parse().unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        SiweMessage::new("example.com", address, "https://example.com", 1, "abc12345", t0)
    }

    #[test]
    fn test_unbounded_claim_is_always_valid() {
        let msg = claim();
        assert_eq!(check_time_window(&msg, msg.issued_at - Duration::days(365)), Ok(()));
        assert_eq!(check_time_window(&msg, msg.issued_at + Duration::days(365)), Ok(()));
    }

    #[test]
    fn test_expiration_is_exclusive() {
        let mut msg = claim();
        let exp = msg.issued_at + Duration::seconds(300);
        msg.expiration_time = Some(exp);

        assert_eq!(check_time_window(&msg, exp - Duration::milliseconds(1)), Ok(()));
        assert_eq!(check_time_window(&msg, exp), Err(RejectReason::Expired));
        assert_eq!(check_time_window(&msg, exp + Duration::seconds(1)), Err(RejectReason::Expired));
    }

    #[test]
    fn test_not_before_is_inclusive() {
        let mut msg = claim();
        let nbf = msg.issued_at + Duration::seconds(60);
        msg.not_before = Some(nbf);

        assert_eq!(check_time_window(&msg, nbf - Duration::seconds(1)), Err(RejectReason::NotYetValid));
        assert_eq!(check_time_window(&msg, nbf), Ok(()));
    }

    #[test]
    fn test_domain_must_match_exactly() {
        assert_eq!(check_domain("example.com", "example.com"), Ok(()));
        assert_eq!(check_domain("evil.example", "example.com"), Err(RejectReason::DomainMismatch));
        assert_eq!(check_domain("login.example.com", "example.com"), Err(RejectReason::DomainMismatch));
        assert_eq!(check_domain("example.com:8443", "example.com"), Err(RejectReason::DomainMismatch));
        assert_eq!(check_domain("Example.com", "example.com"), Err(RejectReason::DomainMismatch));
    }

    #[test]
    fn test_nonce_must_match_exactly() {
        assert_eq!(check_nonce("abc12345", Some("abc12345")), Ok(()));
        assert_eq!(check_nonce("abc12345", Some("abc123456")), Err(RejectReason::NonceMismatch));
        assert_eq!(check_nonce("abc12345", Some("different")), Err(RejectReason::NonceMismatch));
        assert_eq!(check_nonce("abc12345", None), Err(RejectReason::NonceMismatch));
    }

    #[test]
    fn test_domain_from_url() {
        assert_eq!(domain_from_url("https://example.com").as_deref(), Some("example.com"));
        assert_eq!(domain_from_url("https://Example.COM/login?x=1").as_deref(), Some("example.com"));
        assert_eq!(domain_from_url("https://example.com:443").as_deref(), Some("example.com"));
        assert_eq!(domain_from_url("http://localhost:3000").as_deref(), Some("localhost:3000"));
        assert_eq!(domain_from_url("not a url"), None);
    }
}
