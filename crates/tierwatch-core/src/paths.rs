use crate::error::{Result, TierwatchError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const TIERWATCH_DIR: &str = ".tierwatch";
pub const CONFIG_FILE: &str = ".tierwatch/config.yaml";
pub const DB_FILE: &str = ".tierwatch/tickets.db";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn tierwatch_dir(root: &Path) -> PathBuf {
    root.join(TIERWATCH_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

// ---------------------------------------------------------------------------
// Category validation
// ---------------------------------------------------------------------------

static CATEGORY_RE: OnceLock<Regex> = OnceLock::new();

fn category_re() -> &'static Regex {
    CATEGORY_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").expect("static regex")
    })
}

/// Categories key the owner directory, so they share one spelling rule.
pub fn validate_category(category: &str) -> Result<()> {
    if category.is_empty() || category.len() > 64 || !category_re().is_match(category) {
        return Err(TierwatchError::InvalidCategory(category.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_categories() {
        for c in ["billing", "a", "tech-support", "tier2"] {
            validate_category(c).unwrap_or_else(|_| panic!("expected valid: {c}"));
        }
    }

    #[test]
    fn invalid_categories() {
        for c in ["", "-billing", "billing-", "Tech", "tech support", "a_b"] {
            assert!(validate_category(c).is_err(), "expected invalid: {c}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/srv/support");
        assert_eq!(
            config_path(root),
            PathBuf::from("/srv/support/.tierwatch/config.yaml")
        );
        assert_eq!(db_path(root), PathBuf::from("/srv/support/.tierwatch/tickets.db"));
    }
}
