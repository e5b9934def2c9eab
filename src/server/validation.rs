use crate::server::response::ApiError;

const MAX_USERNAME_LEN: usize = 32;
const MIN_USERNAME_LEN: usize = 3;
const MAX_EMAIL_LEN: usize = 255;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_TEXT_LEN: usize = 255;
const MAX_ROLE_NAME_LEN: usize = 64;

fn is_valid_username_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

fn required(value: &str, field: &str, max_len: usize) -> Result<(), ApiError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ApiError::unprocessable(format!("{field} cannot be empty")));
    }
    if value.chars().count() > max_len {
        return Err(ApiError::unprocessable(format!(
            "{field} cannot exceed {max_len} characters"
        )));
    }
    Ok(())
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.len() < MIN_USERNAME_LEN || username.len() > MAX_USERNAME_LEN {
        return Err(ApiError::unprocessable(format!(
            "Username must be between {MIN_USERNAME_LEN} and {MAX_USERNAME_LEN} characters"
        )));
    }
    if !username.chars().all(is_valid_username_char) {
        return Err(ApiError::unprocessable(
            "Username can only contain alphanumeric characters, hyphens, underscores, and periods",
        ));
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ApiError> {
    required(email, "Email", MAX_EMAIL_LEN)?;
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
                && !domain.contains('@')
        }
        None => false,
    };
    if !valid {
        return Err(ApiError::unprocessable("Email address is not valid"));
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::unprocessable(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> Result<(), ApiError> {
    required(name, "Name", MAX_TEXT_LEN)
}

pub fn validate_title(title: &str) -> Result<(), ApiError> {
    required(title, "Title", MAX_TEXT_LEN)
}

pub fn validate_folder_name(name: &str) -> Result<(), ApiError> {
    required(name, "Folder name", MAX_TEXT_LEN)
}

pub fn validate_role_name(name: &str) -> Result<(), ApiError> {
    required(name, "Role name", MAX_ROLE_NAME_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username() {
        assert!(validate_username("ada.l_99").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username(&"x".repeat(33)).is_err());
    }

    #[test]
    fn test_email() {
        assert!(validate_email("ada@test.dev").is_ok());
        for bad in ["", "ada", "@test.dev", "ada@test", "ada@.dev", "a da@test.dev", "a@b@c.dev"] {
            assert!(validate_email(bad).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn test_password_and_text_fields() {
        assert!(validate_password("12345678").is_ok());
        assert!(validate_password("1234567").is_err());
        assert!(validate_title("  ").is_err());
        assert!(validate_title("Groceries").is_ok());
        assert!(validate_role_name(&"r".repeat(65)).is_err());
        assert!(validate_folder_name("Inbox").is_ok());
    }
}
