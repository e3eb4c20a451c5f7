//! The totally ordered permission lattice.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Permission level granted to a user within one casefile.
///
/// Levels are totally ordered: `Owner > Admin > Editor > Viewer > None`.
/// Authorization decisions only ever compare levels, so the derived `Ord`
/// (variant declaration order) is the single source of truth for the order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PermissionLevel {
    /// No access at all.
    None,
    /// Read-only access.
    Viewer,
    /// Can run mutating operations.
    Editor,
    /// Can additionally manage the casefile itself.
    Admin,
    /// The casefile owner; always the top of the lattice.
    Owner,
}

impl PermissionLevel {
    /// Returns true if this level satisfies the given minimum.
    pub fn satisfies(&self, required: PermissionLevel) -> bool {
        *self >= required
    }

    /// Returns true if this level grants any access.
    pub fn grants_access(&self) -> bool {
        *self > PermissionLevel::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_order() {
        assert!(PermissionLevel::Owner > PermissionLevel::Admin);
        assert!(PermissionLevel::Admin > PermissionLevel::Editor);
        assert!(PermissionLevel::Editor > PermissionLevel::Viewer);
        assert!(PermissionLevel::Viewer > PermissionLevel::None);
    }

    #[test]
    fn test_satisfies() {
        assert!(PermissionLevel::Editor.satisfies(PermissionLevel::Viewer));
        assert!(PermissionLevel::Editor.satisfies(PermissionLevel::Editor));
        assert!(!PermissionLevel::Viewer.satisfies(PermissionLevel::Editor));
        assert!(!PermissionLevel::None.grants_access());
    }

    #[test]
    fn test_serde_round_trip() {
        let json = serde_json::to_string(&PermissionLevel::Viewer).unwrap();
        assert_eq!(json, "\"viewer\"");
        let level: PermissionLevel = serde_json::from_str("\"owner\"").unwrap();
        assert_eq!(level, PermissionLevel::Owner);
    }

    #[test]
    fn test_strum_parse() {
        use std::str::FromStr;
        assert_eq!(
            PermissionLevel::from_str("editor").unwrap(),
            PermissionLevel::Editor
        );
        assert_eq!(PermissionLevel::Admin.to_string(), "admin");
    }
}
