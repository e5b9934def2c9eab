use chrono::{Duration, Utc};
use uuid::Uuid;

use super::{SessionTokens, parse_token};
use crate::error::Error;
use crate::store::Store;
use crate::types::{Session, User, UserId};

const MAX_ISSUE_ATTEMPTS: usize = 3;

#[derive(Debug)]
pub enum SessionError {
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    InternalError,
}

/// Extracts a token string from a Basic auth header.
/// Expects format: Basic base64(x-token:actual_token)
pub fn extract_basic_auth_token(header: &str) -> Option<String> {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;

    let (username, password) = credentials.split_once(':')?;

    if username != "x-token" {
        return None;
    }

    Some(password.to_string())
}

/// Extracts token from Authorization header (Bearer or Basic).
/// Returns None if no auth header is present.
pub fn extract_token_from_header(auth_header: Option<&str>) -> Result<Option<String>, SessionError> {
    let Some(header) = auth_header else {
        return Ok(None);
    };

    if let Some(token) = header.strip_prefix("Bearer ") {
        return Ok(Some(token.trim().to_string()));
    }
    if header.starts_with("Basic ") {
        return extract_basic_auth_token(header)
            .ok_or(SessionError::InvalidToken)
            .map(Some);
    }
    Err(SessionError::InvalidScheme)
}

/// Starts a session for `user_id`. Returns the stored session and the raw
/// token, which is never persisted.
pub fn issue_session(
    store: &dyn Store,
    tokens: &SessionTokens,
    user_id: UserId,
    ttl_hours: i64,
) -> crate::error::Result<(Session, String)> {
    for _ in 0..MAX_ISSUE_ATTEMPTS {
        let issued = tokens.issue()?;
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            token_hash: issued.hash,
            token_lookup: issued.lookup,
            user_id,
            created_at: now,
            expires_at: now + Duration::hours(ttl_hours),
            last_used_at: None,
        };

        match store.create_session(&session) {
            Ok(()) => {
                tracing::info!("Issued session {} for user {}", session.id, user_id);
                return Ok((session, issued.raw));
            }
            Err(Error::TokenLookupCollision) => {
                tracing::warn!("Session token lookup collision, retrying");
            }
            Err(e) => return Err(e),
        }
    }
    Err(Error::TokenLookupCollision)
}

/// Resolves a raw token to its live session and the (non-deleted) user.
pub fn validate_session(
    store: &dyn Store,
    tokens: &SessionTokens,
    raw_token: &str,
) -> Result<(Session, User), SessionError> {
    let parts = parse_token(raw_token).map_err(|_| SessionError::InvalidToken)?;

    let session = store
        .get_session_by_lookup(parts.lookup)
        .map_err(|_| SessionError::InternalError)?
        .ok_or(SessionError::InvalidToken)?;

    if !tokens
        .verify(raw_token, &session.token_hash)
        .map_err(|_| SessionError::InternalError)?
    {
        return Err(SessionError::InvalidToken);
    }

    if session.expires_at < Utc::now() {
        return Err(SessionError::TokenExpired);
    }

    let user = store
        .get_user(session.user_id)
        .map_err(|_| SessionError::InternalError)?
        .ok_or(SessionError::InvalidToken)?;

    if let Err(e) = store.update_session_last_used(&session.id) {
        tracing::warn!("Failed to update session last_used_at: {e}");
    }

    Ok((session, user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use crate::types::NewUser;
    use base64::Engine;
    use tempfile::TempDir;

    fn store_with_user() -> (TempDir, SqliteStore, User) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("sessions.db")).unwrap();
        store.initialize().unwrap();
        let user = store
            .create_user(
                &NewUser {
                    name: "Ada".to_string(),
                    username: "ada".to_string(),
                    email: "ada@test.dev".to_string(),
                    password_hash: String::new(),
                    email_verified_at: None,
                },
                &[],
                &[],
            )
            .unwrap();
        (temp, store, user)
    }

    #[test]
    fn test_extract_token_from_header() {
        assert!(extract_token_from_header(None).unwrap().is_none());
        assert_eq!(
            extract_token_from_header(Some("Bearer abc")).unwrap(),
            Some("abc".to_string())
        );

        let basic = format!("Basic {}", base64::engine::general_purpose::STANDARD.encode("x-token:abc"));
        assert_eq!(
            extract_token_from_header(Some(&basic)).unwrap(),
            Some("abc".to_string())
        );

        let wrong_user = format!("Basic {}", base64::engine::general_purpose::STANDARD.encode("ada:abc"));
        assert!(matches!(
            extract_token_from_header(Some(&wrong_user)),
            Err(SessionError::InvalidToken)
        ));
        assert!(matches!(
            extract_token_from_header(Some("Digest abc")),
            Err(SessionError::InvalidScheme)
        ));
    }

    #[test]
    fn test_issue_and_validate() {
        let (_temp, store, user) = store_with_user();
        let tokens = SessionTokens::new();

        let (session, raw) = issue_session(&store, &tokens, user.id, 1).unwrap();
        let (found, found_user) = validate_session(&store, &tokens, &raw).unwrap();
        assert_eq!(found.id, session.id);
        assert_eq!(found_user.id, user.id);

        let (_, other) = issue_session(&store, &tokens, user.id, 1).unwrap();
        let forged = format!("{}{}", &raw[..raw.len() - 24], &other[other.len() - 24..]);
        assert!(matches!(
            validate_session(&store, &tokens, &forged),
            Err(SessionError::InvalidToken)
        ));
    }

    #[test]
    fn test_expired_session_rejected() {
        let (_temp, store, user) = store_with_user();
        let tokens = SessionTokens::new();

        let (_, raw) = issue_session(&store, &tokens, user.id, -1).unwrap();
        assert!(matches!(
            validate_session(&store, &tokens, &raw),
            Err(SessionError::TokenExpired)
        ));
    }

    #[test]
    fn test_deleted_user_session_rejected() {
        let (_temp, store, user) = store_with_user();
        let tokens = SessionTokens::new();

        let (_, raw) = issue_session(&store, &tokens, user.id, 1).unwrap();
        store.delete_users(&[user.id]).unwrap();
        assert!(validate_session(&store, &tokens, &raw).is_err());
    }

    #[test]
    fn test_logout_invalidates() {
        let (_temp, store, user) = store_with_user();
        let tokens = SessionTokens::new();

        let (session, raw) = issue_session(&store, &tokens, user.id, 1).unwrap();
        assert!(store.delete_session(&session.id).unwrap());
        assert!(matches!(
            validate_session(&store, &tokens, &raw),
            Err(SessionError::InvalidToken)
        ));
    }
}
