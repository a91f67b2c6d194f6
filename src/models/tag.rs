use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
}

impl Tag {
    pub fn new(name: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(AppError::InvalidTag(
                "Tag must contain non-whitespace characters.".to_string(),
            ));
        }
        Ok(Self {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_tag_is_rejected() {
        assert!(Tag::new("   ").is_err());
        assert_eq!(Tag::new("space").unwrap().name, "space");
    }
}
