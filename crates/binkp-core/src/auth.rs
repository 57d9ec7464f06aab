//! Session passwords and CRAM-MD5 challenge/response.
//!
//! The answering side may announce a random challenge with
//! `M_NUL "OPT CRAM-MD5-<hex>"`. An originator that understands it replies
//! `M_PWD "CRAM-MD5-<hex hmac-md5(password, challenge)>"` instead of sending
//! the password in clear.

use hmac::{Hmac, Mac};
use md5::Md5;
use rand::RngCore;
use subtle::ConstantTimeEq;

type HmacMd5 = Hmac<Md5>;

/// Prefix of CRAM-MD5 challenges (in OPT) and responses (in PWD)
pub const CRAM_PREFIX: &str = "CRAM-MD5-";

/// Password sent when none is configured
pub const NO_PASSWORD: &str = "-";

/// Random bytes in a generated challenge
pub const CHALLENGE_LEN: usize = 16;

/// Generate a fresh random challenge
#[must_use]
pub fn generate_challenge() -> Vec<u8> {
    let mut challenge = vec![0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

/// OPT token announcing `challenge`
#[must_use]
pub fn challenge_option(challenge: &[u8]) -> String {
    format!("{CRAM_PREFIX}{}", hex::encode(challenge))
}

/// Find a CRAM-MD5 challenge among the tokens of an OPT line
#[must_use]
pub fn parse_challenge(options: &str) -> Option<Vec<u8>> {
    options
        .split_ascii_whitespace()
        .filter_map(|token| token.strip_prefix(CRAM_PREFIX))
        .find_map(|digest| hex::decode(digest).ok())
        .filter(|challenge| !challenge.is_empty())
}

fn keyed(password: &str, challenge: &[u8]) -> Option<HmacMd5> {
    let mut mac = HmacMd5::new_from_slice(password.as_bytes()).ok()?;
    mac.update(challenge);
    Some(mac)
}

/// Compare secrets in time that depends only on their lengths
#[must_use]
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.ct_eq(b).into()
}

/// PWD argument answering `challenge` with `password`
#[must_use]
pub fn cram_response(password: &str, challenge: &[u8]) -> Option<String> {
    let digest = keyed(password, challenge)?.finalize().into_bytes();
    Some(format!("{CRAM_PREFIX}{}", hex::encode(digest)))
}

/// Check a PWD argument against the expected password.
///
/// CRAM-MD5 responses are only accepted when a challenge was issued.
/// Anything else must equal the password exactly. Both forms are compared
/// in constant time.
#[must_use]
pub fn verify_password(expected: &str, offered: &str, challenge: Option<&[u8]>) -> bool {
    match (offered.strip_prefix(CRAM_PREFIX), challenge) {
        (Some(digest), Some(challenge)) => {
            let Ok(digest) = hex::decode(digest) else {
                return false;
            };
            keyed(expected, challenge).is_some_and(|mac| mac.verify_slice(&digest).is_ok())
        }
        _ => ct_eq(offered.as_bytes(), expected.as_bytes()),
    }
}

/// Check if a configured password means "no authentication"
#[must_use]
pub fn is_unset(password: &str) -> bool {
    password.is_empty() || password == NO_PASSWORD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc2104_md5_vector() {
        // RFC 2104 test case: key "Jefe", data "what do ya want for nothing?"
        let response = cram_response("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(response, "CRAM-MD5-750c783e6ab0b503eaa86e310a5db738");
    }

    #[test]
    fn test_challenge_roundtrip() {
        let challenge = generate_challenge();
        assert_eq!(challenge.len(), CHALLENGE_LEN);

        let opt = format!("NR {} ND", challenge_option(&challenge));
        assert_eq!(parse_challenge(&opt), Some(challenge));
        assert_eq!(parse_challenge("NR ND"), None);
        assert_eq!(parse_challenge("CRAM-MD5-zz"), None);
    }

    #[test]
    fn test_verify_cram() {
        let challenge = generate_challenge();
        let response = cram_response("secret", &challenge).unwrap();

        assert!(verify_password("secret", &response, Some(&challenge)));
        assert!(!verify_password("Secret", &response, Some(&challenge)));
        assert!(!verify_password("secret", &response, None));
        assert!(!verify_password("secret", "CRAM-MD5-nothex", Some(&challenge)));
    }

    #[test]
    fn test_verify_plain_is_case_sensitive() {
        assert!(verify_password("secret", "secret", None));
        assert!(verify_password("secret", "secret", Some(b"abc")));
        assert!(!verify_password("secret", "SECRET", None));
        assert!(!verify_password("secret", "", None));
    }

    #[test]
    fn test_verify_plain_rejects_prefixes_and_extensions() {
        assert!(!verify_password("secret", "secre", None));
        assert!(!verify_password("secret", "secret ", None));
        assert!(!verify_password("secret", "secret\0", None));
        assert!(!verify_password("", "x", None));
        assert!(verify_password("", "", None));
    }

    #[test]
    fn test_ct_eq() {
        assert!(ct_eq(b"", b""));
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"abcd"));
    }

    #[test]
    fn test_is_unset() {
        assert!(is_unset(""));
        assert!(is_unset("-"));
        assert!(!is_unset("pw"));
    }
}
