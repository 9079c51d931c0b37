use crate::error::{CoreError, Result};

/// Generate a new server-assigned resource id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Validate a client-supplied resource id: letters, digits, `-` and `.`,
/// between 1 and 64 characters.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 {
        return Err(CoreError::invalid_id(id));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(CoreError::invalid_id(id));
    }
    Ok(())
}
