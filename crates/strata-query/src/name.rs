//! Name validation for targets, queries and groups.

use strata_core::error::{Error, Result};

/// Target names: `[A-Za-z]([_A-Za-z0-9]*[A-Za-z0-9])?`.
///
/// Generated type names are `{target}_{level}_{digest}`, so a target name must
/// itself be a plain identifier.
pub fn validate_target_name(name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    let valid = match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphabetic()
                && last.is_ascii_alphanumeric()
                && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidName(format!("invalid target name '{name}'")))
    }
}

pub fn validate_query_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidName(format!("invalid query name '{name}'")));
    }
    Ok(())
}

/// The target of a `LOOPBACK(target)` group, if `group` is one.
pub fn loopback_target(group: &str) -> Option<&str> {
    let g = group.trim();
    let prefix = "loopback(";
    let head = g.get(..prefix.len())?;
    if g.len() > prefix.len() + 1 && head.eq_ignore_ascii_case(prefix) && g.ends_with(')') {
        Some(g[prefix.len()..g.len() - 1].trim())
    } else {
        None
    }
}

pub fn validate_group(group: &str) -> Result<()> {
    if group.trim().is_empty() {
        return Err(Error::InvalidName("empty query group".into()));
    }
    if let Some(target) = loopback_target(group) {
        validate_target_name(target)?;
    } else if group.trim().to_ascii_lowercase().starts_with("loopback(") {
        return Err(Error::InvalidName(format!("malformed loopback group '{group}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_names() {
        for ok in ["t", "access_log", "A1", "a_b_c9"] {
            assert!(validate_target_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "_t", "t_", "1t", "a-b", "a.b", "t "] {
            assert!(validate_target_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn query_names() {
        assert!(validate_query_name("q1").is_ok());
        assert!(validate_query_name("count/min").is_ok());
        assert!(validate_query_name("").is_err());
        assert!(validate_query_name("a b").is_err());
    }

    #[test]
    fn loopback_groups() {
        assert_eq!(loopback_target("LOOPBACK(t2)"), Some("t2"));
        assert_eq!(loopback_target("loopback( t2 )"), Some("t2"));
        assert_eq!(loopback_target("default"), None);
        assert!(validate_group("LOOPBACK(t2)").is_ok());
        assert!(validate_group("LOOPBACK(_x)").is_err());
        assert!(validate_group("loopback(").is_err());
        assert!(validate_group("web").is_ok());
    }

    #[test]
    fn non_ascii_groups_are_plain_groups() {
        assert_eq!(loopback_target("ééééé)"), None);
        assert!(validate_group("ééééé)").is_ok());
        assert!(validate_group("gruppe-übersicht)").is_ok());
        assert_eq!(loopback_target("loopback(é)"), Some("é"));
        assert!(validate_group("loopback(é)").is_err());
    }
}
