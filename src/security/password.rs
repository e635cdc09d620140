//! PBKDF2-HMAC-SHA256 password hashing.
//!
//! Stored format: `pbkdf2_sha256$<iterations>$<salt_b64url>$<hash_b64url>`
//! with unpadded URL-safe base64.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, RngCore, seq::SliceRandom};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::AppConfig;

const ALGORITHM: &str = "pbkdf2_sha256";
const SALT_BYTES: usize = 16;
const HASH_BYTES: usize = 32;
pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasswordError {
    #[error("Password must not be empty")]
    Empty,
    #[error("Password must be at least {MIN_PASSWORD_LENGTH} characters")]
    TooShort,
}

#[derive(Debug, Clone)]
pub struct PasswordHasher {
    iterations: u32,
    pepper: Option<String>,
}

struct ParsedHash {
    iterations: u32,
    salt: Vec<u8>,
    digest: Vec<u8>,
}

impl PasswordHasher {
    pub fn new(iterations: u32, pepper: Option<String>) -> Self {
        Self {
            iterations,
            pepper: pepper.filter(|p| !p.is_empty()),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.pbkdf2_iterations, config.password_pepper.clone())
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Hashes a password with a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String, PasswordError> {
        validate_password(password)?;

        let mut salt = [0u8; SALT_BYTES];
        rand::thread_rng().fill_bytes(&mut salt);

        let mut digest = [0u8; HASH_BYTES];
        self.derive(password, &salt, self.iterations, &mut digest);

        Ok(format!(
            "{ALGORITHM}${}${}${}",
            self.iterations,
            URL_SAFE_NO_PAD.encode(salt),
            URL_SAFE_NO_PAD.encode(digest)
        ))
    }

    /// Verifies `password` against a stored hash. Malformed hashes never verify.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        let Some(parsed) = parse_hash(stored) else {
            return false;
        };

        let mut candidate = vec![0u8; parsed.digest.len()];
        self.derive(password, &parsed.salt, parsed.iterations, &mut candidate);
        candidate.ct_eq(&parsed.digest).into()
    }

    /// True when the stored hash should be upgraded to the current parameters.
    pub fn needs_rehash(&self, stored: &str) -> bool {
        match parse_hash(stored) {
            Some(parsed) => parsed.iterations < self.iterations || parsed.digest.len() != HASH_BYTES,
            None => true,
        }
    }

    fn derive(&self, password: &str, salt: &[u8], iterations: u32, out: &mut [u8]) {
        let mut input = password.as_bytes().to_vec();
        if let Some(pepper) = &self.pepper {
            input.extend_from_slice(pepper.as_bytes());
        }
        pbkdf2::pbkdf2_hmac::<Sha256>(&input, salt, iterations, out);
    }
}

fn parse_hash(stored: &str) -> Option<ParsedHash> {
    let mut parts = stored.split('$');
    let (Some(algorithm), Some(iterations), Some(salt), Some(digest), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return None;
    };

    if algorithm != ALGORITHM {
        return None;
    }

    let iterations: u32 = iterations.parse().ok().filter(|n| *n > 0)?;
    let salt = URL_SAFE_NO_PAD.decode(salt.trim_end_matches('=')).ok()?;
    let digest = URL_SAFE_NO_PAD.decode(digest.trim_end_matches('=')).ok()?;
    if salt.is_empty() || digest.is_empty() {
        return None;
    }

    Some(ParsedHash {
        iterations,
        salt,
        digest,
    })
}

/// Minimum password policy applied before hashing.
pub fn validate_password(password: &str) -> Result<(), PasswordError> {
    if password.is_empty() {
        return Err(PasswordError::Empty);
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(PasswordError::TooShort);
    }
    Ok(())
}

/// Generates a random password drawing from lower, upper, digit and symbol classes.
pub fn random_password(length: usize) -> String {
    const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
    const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
    const DIGITS: &[u8] = b"23456789";
    const SYMBOLS: &[u8] = b"!@#$%^&*-_=+";
    const CLASSES: [&[u8]; 4] = [LOWER, UPPER, DIGITS, SYMBOLS];

    let length = length.max(12);
    let mut rng = rand::thread_rng();

    let mut chars: Vec<u8> = CLASSES
        .iter()
        .map(|class| class[rng.gen_range(0..class.len())])
        .collect();
    while chars.len() < length {
        let class = CLASSES[rng.gen_range(0..CLASSES.len())];
        chars.push(class[rng.gen_range(0..class.len())]);
    }
    chars.shuffle(&mut rng);

    chars.into_iter().map(char::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hasher() -> PasswordHasher {
        PasswordHasher::new(1_000, None)
    }

    #[test]
    fn hash_then_verify() {
        let hasher = hasher();
        let stored = hasher.hash("correct horse battery").unwrap();

        assert!(stored.starts_with("pbkdf2_sha256$1000$"));
        assert_eq!(stored.split('$').count(), 4);
        assert!(hasher.verify("correct horse battery", &stored));
        assert!(!hasher.verify("wrong horse battery", &stored));
    }

    #[test]
    fn salts_differ_between_hashes() {
        let hasher = hasher();
        let first = hasher.hash("same-password").unwrap();
        let second = hasher.hash("same-password").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn rejects_short_and_empty_passwords() {
        assert_eq!(hasher().hash(""), Err(PasswordError::Empty));
        assert_eq!(hasher().hash("short"), Err(PasswordError::TooShort));
    }

    #[test]
    fn malformed_hashes_never_verify() {
        let hasher = hasher();
        for stored in [
            "",
            "plaintext",
            "bcrypt$10$abc$def",
            "pbkdf2_sha256$notanumber$abc$def",
            "pbkdf2_sha256$0$abc$def",
            "pbkdf2_sha256$1000$!!!$def",
            "pbkdf2_sha256$1000$abc$def$extra",
        ] {
            assert!(!hasher.verify("whatever1", stored), "{stored} verified");
        }
    }

    #[test]
    fn needs_rehash_when_iterations_increase() {
        let old = PasswordHasher::new(1_000, None);
        let stored = old.hash("password-123").unwrap();

        assert!(!old.needs_rehash(&stored));
        assert!(PasswordHasher::new(2_000, None).needs_rehash(&stored));
        assert!(old.needs_rehash("garbage"));
    }

    #[test]
    fn pepper_changes_digest() {
        let plain = PasswordHasher::new(1_000, None);
        let peppered = PasswordHasher::new(1_000, Some("pepper".to_string()));
        let stored = peppered.hash("password-123").unwrap();

        assert!(peppered.verify("password-123", &stored));
        assert!(!plain.verify("password-123", &stored));
    }

    #[test]
    fn random_password_mixes_character_classes() {
        let password = random_password(16);

        assert_eq!(password.len(), 16);
        assert!(password.chars().any(|c| c.is_ascii_lowercase()));
        assert!(password.chars().any(|c| c.is_ascii_uppercase()));
        assert!(password.chars().any(|c| c.is_ascii_digit()));
        assert!(password.chars().any(|c| !c.is_ascii_alphanumeric()));
    }
}
