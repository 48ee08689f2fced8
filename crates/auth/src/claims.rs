use serde::{Deserialize, Serialize};

/// Custom claims carried in every issued credential.
///
/// The wire names match what the gateway's web clients already consume:
/// `roles` is a list of `ROLE_*` authorities, `nickName` the display name,
/// and `tokenVersion` the version-fencing counter compared against the user
/// row on every privileged call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CredentialClaims {
    pub sub: String,
    pub roles: Vec<String>,
    pub nick_name: String,
    pub token_version: i64,
}
