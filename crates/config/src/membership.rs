//! Paid-tier membership durations.

use serde::Deserialize;

/// Day grants applied when a user is recharged into a paid tier.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MembershipConfig {
    /// Days of membership granted to the MEMBER tier.
    pub member_days: u32,
    /// Days of membership granted to the SUPER_MEMBER tier.
    pub super_member_days: u32,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            member_days: 30,
            super_member_days: 365,
        }
    }
}
