use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::Rng;

use crate::error::{Error, Result};

const ARGON2_MEMORY_KIB: u32 = 64 * 1024;
const ARGON2_ITERATIONS: u32 = 1;
const ARGON2_PARALLELISM: u32 = 4;
const ARGON2_OUTPUT_LEN: usize = 32;

const TOKEN_PREFIX: &str = "elroi";
const LOOKUP_LENGTH: usize = 8;
const SECRET_LENGTH: usize = 24;
const SECRET_BYTES: usize = SECRET_LENGTH / 2;

/// A freshly minted session token. `raw` is shown to the client once;
/// only `lookup` and `hash` are stored.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub raw: String,
    pub lookup: String,
    pub hash: String,
}

/// The two halves of a well-formed `elroi_<lookup>_<secret>` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenParts<'a> {
    pub lookup: &'a str,
    pub secret: &'a str,
}

pub struct SessionTokens {
    argon2: Argon2<'static>,
}

impl Default for SessionTokens {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTokens {
    #[must_use]
    pub fn new() -> Self {
        let params = Params::new(
            ARGON2_MEMORY_KIB,
            ARGON2_ITERATIONS,
            ARGON2_PARALLELISM,
            Some(ARGON2_OUTPUT_LEN),
        )
        .expect("invalid argon2 params");

        Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        }
    }

    pub fn issue(&self) -> Result<IssuedToken> {
        let lookup = generate_lookup();
        let raw = format!("{TOKEN_PREFIX}_{lookup}_{}", generate_secret());
        let hash = self.hash(&raw)?;
        Ok(IssuedToken { raw, lookup, hash })
    }

    fn hash(&self, token: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2
            .hash_password(token.as_bytes(), &salt)
            .map_err(|e| Error::Config(format!("failed to hash token: {e}")))?;
        Ok(hash.to_string())
    }

    /// Checks a raw token against a stored PHC hash.
    pub fn verify(&self, token: &str, hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(hash)
            .map_err(|e| Error::Config(format!("invalid hash format: {e}")))?;

        match self.argon2.verify_password(token.as_bytes(), &parsed_hash) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Config(format!("failed to verify token: {e}"))),
        }
    }
}

fn generate_lookup() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..LOOKUP_LENGTH].to_string()
}

fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Splits a token into lookup and secret, rejecting anything malformed.
pub fn parse_token(token: &str) -> Result<TokenParts<'_>> {
    let rest = token
        .strip_prefix(TOKEN_PREFIX)
        .and_then(|r| r.strip_prefix('_'))
        .ok_or(Error::InvalidTokenFormat)?;
    let (lookup, secret) = rest.split_once('_').ok_or(Error::InvalidTokenFormat)?;

    let well_formed = |s: &str, len: usize| {
        s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    };
    if !well_formed(lookup, LOOKUP_LENGTH) || !well_formed(secret, SECRET_LENGTH) {
        return Err(Error::InvalidTokenFormat);
    }

    Ok(TokenParts { lookup, secret })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "elroi_0a1b2c3d_0123456789abcdef01234567";

    #[test]
    fn test_issued_token_format() {
        let tokens = SessionTokens::new();
        let issued = tokens.issue().unwrap();

        assert!(issued.raw.starts_with("elroi_"));
        let parts = parse_token(&issued.raw).unwrap();
        assert_eq!(parts.lookup, issued.lookup);
        assert_eq!(parts.secret.len(), 24);
        assert!(issued.hash.starts_with("$argon2id$"));
    }

    #[test]
    fn test_verify() {
        let tokens = SessionTokens::new();
        let issued = tokens.issue().unwrap();

        assert!(tokens.verify(&issued.raw, &issued.hash).unwrap());

        let other = tokens.issue().unwrap();
        assert!(!tokens.verify(&other.raw, &issued.hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        let tokens = SessionTokens::new();
        assert!(tokens.verify(VALID, "not-a-hash").is_err());
    }

    #[test]
    fn test_parse_token() {
        let parts = parse_token(VALID).unwrap();
        assert_eq!(parts.lookup, "0a1b2c3d");
        assert_eq!(parts.secret, "0123456789abcdef01234567");
    }

    #[test]
    fn test_parse_token_rejects_malformed() {
        for bad in [
            "",
            "notes_0a1b2c3d_0123456789abcdef01234567",
            "elroi_0a1b2c3d",
            "elroi_0a1b2c3_0123456789abcdef01234567",
            "elroi_0a1b2c3d_0123456789abcdef0123456",
            "elroi_0A1B2C3D_0123456789abcdef01234567",
            "elroi_0a1b2c3d_0123456789abcdef01234567_x",
            "elroi0a1b2c3d_0123456789abcdef01234567",
        ] {
            assert!(parse_token(bad).is_err(), "{bad} accepted");
        }
    }
}
