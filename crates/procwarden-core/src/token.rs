//! Session tokens for trust-tier elevation.
//!
//! A token is minted offline by an operator holding the daemon's shared
//! secret and presented by a client over an established session. It encodes
//! the tier being claimed and an expiry, bound together by an HMAC-SHA-256
//! tag, and travels as lower-case hex:
//!
//! ```text
//! [version: u8][tier: u8][expires_at: u64 BE][nonce: 16 bytes][mac: 32 bytes]
//! ```
//!
//! Verification is fail-closed: the tag is checked in constant time before
//! any field is trusted, and unknown versions or tier bytes are rejected
//! rather than mapped to a default.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::tier::TrustTier;

/// Current token format version.
pub const TOKEN_VERSION: u8 = 1;

const NONCE_LEN: usize = 16;
const MAC_LEN: usize = 32;
const PAYLOAD_LEN: usize = 1 + 1 + 8 + NONCE_LEN;

/// Decoded token length in bytes (hex strings are twice this).
pub const TOKEN_LEN: usize = PAYLOAD_LEN + MAC_LEN;

/// Minimum accepted secret length in bytes.
pub const MIN_SECRET_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// A verified session token's claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionToken {
    /// Tier the bearer may elevate to.
    pub tier: TrustTier,
    /// Expiry in unix seconds. The token is valid strictly before this.
    pub expires_at: u64,
}

/// Failures while minting, loading, or verifying tokens.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The presented string is not hex of the expected length.
    #[error("token is not valid hex of the expected length")]
    Malformed,

    /// The token was minted with a format this build does not know.
    #[error("unsupported token version {version}")]
    UnknownVersion { version: u8 },

    /// The token's tier byte maps to no known tier.
    #[error("token names unknown tier {tier}")]
    UnknownTier { tier: u8 },

    /// The HMAC tag did not match.
    #[error("token signature verification failed")]
    VerificationFailed,

    /// The token's expiry has passed.
    #[error("token expired at {expired_at} (unix seconds)")]
    Expired { expired_at: u64 },

    /// The shared secret is too short to key the MAC safely.
    #[error("token secret is {len} bytes, need at least {MIN_SECRET_LEN}")]
    WeakSecret { len: usize },

    /// The secret file is readable by group or other.
    #[error("token secret file {path} is group or world accessible (mode {mode:03o})")]
    InsecureSecretFile { path: String, mode: u32 },

    /// The secret file could not be read.
    #[error("failed to read token secret file {path}")]
    SecretIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Keying the MAC failed. Not reachable with HMAC-SHA-256 key sizes,
    /// kept so callers never see a panic path.
    #[error("failed to key the token mac")]
    Mac,
}

/// Current time in unix seconds.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Mints a token granting `tier` until `expires_at` (unix seconds).
///
/// # Errors
///
/// Returns [`TokenError::WeakSecret`] if the secret is shorter than
/// [`MIN_SECRET_LEN`] bytes.
pub fn mint(secret: &SecretString, tier: TrustTier, expires_at: u64) -> Result<String, TokenError> {
    let key = secret_key(secret)?;

    let mut payload = [0_u8; PAYLOAD_LEN];
    payload[0] = TOKEN_VERSION;
    payload[1] = tier.as_repr();
    payload[2..10].copy_from_slice(&expires_at.to_be_bytes());
    rand::thread_rng().fill_bytes(&mut payload[10..10 + NONCE_LEN]);

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| TokenError::Mac)?;
    mac.update(&payload);
    let tag = mac.finalize().into_bytes();

    let mut token = [0_u8; TOKEN_LEN];
    token[..PAYLOAD_LEN].copy_from_slice(&payload);
    token[PAYLOAD_LEN..].copy_from_slice(&tag);
    Ok(hex::encode(token))
}

/// Verifies `token_hex` against `secret` at time `now_unix`.
///
/// The MAC is compared in constant time before the tier or expiry bytes are
/// interpreted, so attacker-controlled tokens learn nothing from which check
/// fails first beyond version support.
///
/// # Errors
///
/// Returns a [`TokenError`] describing the first check that failed.
pub fn verify(
    secret: &SecretString,
    token_hex: &str,
    now_unix: u64,
) -> Result<SessionToken, TokenError> {
    let key = secret_key(secret)?;

    let raw = hex::decode(token_hex).map_err(|_| TokenError::Malformed)?;
    if raw.len() != TOKEN_LEN {
        return Err(TokenError::Malformed);
    }
    let (payload, tag) = raw.split_at(PAYLOAD_LEN);

    let version = payload[0];
    if version != TOKEN_VERSION {
        return Err(TokenError::UnknownVersion { version });
    }

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| TokenError::Mac)?;
    mac.update(payload);
    let expected = mac.finalize().into_bytes();
    if expected.ct_eq(tag).unwrap_u8() != 1 {
        return Err(TokenError::VerificationFailed);
    }

    let tier = TrustTier::from_repr(payload[1])
        .ok_or(TokenError::UnknownTier { tier: payload[1] })?;

    let mut expiry_bytes = [0_u8; 8];
    expiry_bytes.copy_from_slice(&payload[2..10]);
    let expires_at = u64::from_be_bytes(expiry_bytes);
    if now_unix >= expires_at {
        return Err(TokenError::Expired { expired_at: expires_at });
    }

    Ok(SessionToken { tier, expires_at })
}

/// Loads the shared secret from `path`, enforcing owner-only permissions
/// and a minimum length. Surrounding whitespace (trailing newlines from
/// editors) is ignored.
///
/// # Errors
///
/// Returns [`TokenError::SecretIo`], [`TokenError::InsecureSecretFile`], or
/// [`TokenError::WeakSecret`].
pub fn load_secret(path: &Path) -> Result<SecretString, TokenError> {
    let io_err = |source| TokenError::SecretIo {
        path: path.display().to_string(),
        source,
    };

    let metadata = fs::metadata(path).map_err(io_err)?;
    let mode = metadata.permissions().mode() & 0o777;
    if mode & 0o077 != 0 {
        return Err(TokenError::InsecureSecretFile {
            path: path.display().to_string(),
            mode,
        });
    }

    let contents = fs::read_to_string(path).map_err(io_err)?;
    let trimmed = contents.trim();
    if trimmed.len() < MIN_SECRET_LEN {
        return Err(TokenError::WeakSecret { len: trimmed.len() });
    }
    Ok(SecretString::from(trimmed.to_owned()))
}

fn secret_key(secret: &SecretString) -> Result<&[u8], TokenError> {
    let bytes = secret.expose_secret().as_bytes();
    if bytes.len() < MIN_SECRET_LEN {
        return Err(TokenError::WeakSecret { len: bytes.len() });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn test_secret() -> SecretString {
        SecretString::from("0123456789abcdef0123456789abcdef-test-secret")
    }

    #[test]
    fn mint_then_verify_returns_the_claims() {
        let secret = test_secret();
        for tier in TrustTier::ALL {
            let token = mint(&secret, tier, 2_000).unwrap();
            let claims = verify(&secret, &token, 1_000).unwrap();
            assert_eq!(claims.tier, tier);
            assert_eq!(claims.expires_at, 2_000);
        }
    }

    #[test]
    fn expired_token_is_rejected() {
        let secret = test_secret();
        let token = mint(&secret, TrustTier::Maximum, 1_000).unwrap();
        let err = verify(&secret, &token, 1_000).unwrap_err();
        assert!(matches!(err, TokenError::Expired { expired_at: 1_000 }));
        let err = verify(&secret, &token, 5_000).unwrap_err();
        assert!(matches!(err, TokenError::Expired { .. }));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let token = mint(&test_secret(), TrustTier::Medium, 2_000).unwrap();
        let other = SecretString::from("another-secret-that-is-long-enough-0000");
        assert!(matches!(
            verify(&other, &token, 1_000),
            Err(TokenError::VerificationFailed)
        ));
    }

    #[test]
    fn flipping_any_nibble_fails_verification() {
        let secret = test_secret();
        let token = mint(&secret, TrustTier::Medium, 2_000).unwrap();
        for position in 0..token.len() {
            let mut tampered: Vec<u8> = token.bytes().collect();
            tampered[position] = if tampered[position] == b'0' { b'1' } else { b'0' };
            let tampered = String::from_utf8(tampered).unwrap();
            let result = verify(&secret, &tampered, 1_000);
            assert!(
                !matches!(result, Ok(_)),
                "tampering at {position} was accepted"
            );
        }
    }

    #[test]
    fn truncated_and_non_hex_tokens_are_malformed() {
        let secret = test_secret();
        let token = mint(&secret, TrustTier::Low, 2_000).unwrap();
        assert!(matches!(
            verify(&secret, &token[..token.len() - 2], 1_000),
            Err(TokenError::Malformed)
        ));
        assert!(matches!(
            verify(&secret, "zz-not-hex", 1_000),
            Err(TokenError::Malformed)
        ));
        assert!(matches!(verify(&secret, "", 1_000), Err(TokenError::Malformed)));
    }

    #[test]
    fn unknown_version_is_reported_before_the_mac_check() {
        let secret = test_secret();
        let token = mint(&secret, TrustTier::Low, 2_000).unwrap();
        let mut raw = hex::decode(&token).unwrap();
        raw[0] = 9;
        let err = verify(&secret, &hex::encode(raw), 1_000).unwrap_err();
        assert!(matches!(err, TokenError::UnknownVersion { version: 9 }));
    }

    #[test]
    fn short_secrets_are_refused_outright() {
        let weak = SecretString::from("short");
        assert!(matches!(
            mint(&weak, TrustTier::Low, 2_000),
            Err(TokenError::WeakSecret { len: 5 })
        ));
        assert!(matches!(
            verify(&weak, "00", 1_000),
            Err(TokenError::WeakSecret { .. })
        ));
    }

    #[test]
    fn load_secret_enforces_owner_only_permissions() {
        use std::io::Write as _;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.secret");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "0123456789abcdef0123456789abcdef").unwrap();
        drop(file);

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            load_secret(&path),
            Err(TokenError::InsecureSecretFile { mode: 0o644, .. })
        ));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        let secret = load_secret(&path).unwrap();
        assert_eq!(secret.expose_secret(), "0123456789abcdef0123456789abcdef");
    }

    #[test]
    fn load_secret_rejects_short_contents() {
        use std::io::Write as _;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.secret");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "too-short").unwrap();
        drop(file);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

        assert!(matches!(load_secret(&path), Err(TokenError::WeakSecret { len: 9 })));
    }

    proptest! {
        #[test]
        fn arbitrary_strings_never_verify(input in ".{0,200}") {
            let secret = test_secret();
            prop_assert!(verify(&secret, &input, 1_000).is_err());
        }

        #[test]
        fn forged_payloads_with_random_tags_never_verify(
            tier in 0_u8..=2,
            expires in 1_001_u64..u64::MAX,
            nonce in proptest::array::uniform16(any::<u8>()),
            tag in proptest::collection::vec(any::<u8>(), MAC_LEN),
        ) {
            let mut raw = Vec::with_capacity(TOKEN_LEN);
            raw.push(TOKEN_VERSION);
            raw.push(tier);
            raw.extend_from_slice(&expires.to_be_bytes());
            raw.extend_from_slice(&nonce);
            raw.extend_from_slice(&tag);
            let result = verify(&test_secret(), &hex::encode(raw), 1_000);
            prop_assert!(matches!(result, Err(TokenError::VerificationFailed)));
        }
    }
}
