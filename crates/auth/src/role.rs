use serde::{Deserialize, Serialize};

/// User role tiers, stored as integers and rendered as `ROLE_*` names in
/// credentials and model allow-lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Free tier.
    Normal,
    /// Paid tier with a membership expiry.
    Member,
    /// Higher paid tier with a membership expiry.
    SuperMember,
    /// Operator role; never subject to membership expiry.
    Admin,
}

impl Role {
    /// The integer code persisted in the user row.
    pub fn code(self) -> i64 {
        match self {
            Role::Normal => 0,
            Role::Member => 1,
            Role::SuperMember => 2,
            Role::Admin => 3,
        }
    }

    /// Parse the persisted integer code.
    pub fn from_code(code: i64) -> Option<Role> {
        match code {
            0 => Some(Role::Normal),
            1 => Some(Role::Member),
            2 => Some(Role::SuperMember),
            3 => Some(Role::Admin),
            _ => None,
        }
    }

    /// The bare role name, e.g. `SUPER_MEMBER`.
    pub fn name(self) -> &'static str {
        match self {
            Role::Normal => "NORMAL",
            Role::Member => "MEMBER",
            Role::SuperMember => "SUPER_MEMBER",
            Role::Admin => "ADMIN",
        }
    }

    /// The prefixed form carried in credentials and allow-lists, e.g. `ROLE_MEMBER`.
    pub fn authority(self) -> &'static str {
        match self {
            Role::Normal => "ROLE_NORMAL",
            Role::Member => "ROLE_MEMBER",
            Role::SuperMember => "ROLE_SUPER_MEMBER",
            Role::Admin => "ROLE_ADMIN",
        }
    }

    /// Parse either the bare or the `ROLE_`-prefixed form.
    pub fn parse(name: &str) -> Option<Role> {
        match name.strip_prefix("ROLE_").unwrap_or(name) {
            "NORMAL" => Some(Role::Normal),
            "MEMBER" => Some(Role::Member),
            "SUPER_MEMBER" => Some(Role::SuperMember),
            "ADMIN" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Whether this role carries a membership expiry that can lapse.
    pub fn is_paid_tier(self) -> bool {
        matches!(self, Role::Member | Role::SuperMember)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for role in [Role::Normal, Role::Member, Role::SuperMember, Role::Admin] {
            assert_eq!(Role::from_code(role.code()), Some(role));
        }

        assert_eq!(Role::from_code(7), None);
    }

    #[test]
    fn parses_both_forms() {
        assert_eq!(Role::parse("ROLE_SUPER_MEMBER"), Some(Role::SuperMember));
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse("ROLE_GUEST"), None);
    }

    #[test]
    fn paid_tiers() {
        assert!(Role::Member.is_paid_tier());
        assert!(Role::SuperMember.is_paid_tier());
        assert!(!Role::Normal.is_paid_tier());
        assert!(!Role::Admin.is_paid_tier());
    }
}
