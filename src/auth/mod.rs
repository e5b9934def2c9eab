mod helpers;
mod middleware;
mod password;
mod token;

pub use helpers::{issue_session, validate_session};
pub use middleware::{AuthError, RequireUser};
pub use password::PasswordHasher;
pub use token::{SessionTokens, parse_token};
