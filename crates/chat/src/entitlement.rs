use auth::{CredentialGuard, Identity, Role};
use storage::{ModelRow, Storage, UserRow};

use crate::error::ChatError;

/// Outcome of the entitlement check for one request.
pub(crate) enum Entitlement {
    /// The caller may proceed; the authoritative user row rides along for
    /// conversation attribution.
    Allowed(UserRow),
    /// The caller's paid membership lapsed mid-lifecycle. The account has
    /// been reset to the normal tier and a fresh credential minted; the
    /// original request must not proceed.
    Demoted {
        /// The replacement credential.
        token: String,
    },
}

/// Authorize a validated identity against a model's allow-list, re-reading
/// authoritative state on every call.
///
/// Order matters: a stale fencing version rejects before the allow-list is
/// consulted, and only paid tiers on non-free models reach the expiry check.
/// The expiry check is the one authorization step with a durable side
/// effect, because entitlement can lapse between login and any later
/// request and the gateway re-evaluates eagerly instead of sweeping.
pub(crate) async fn authorize(
    storage: &Storage,
    guard: &CredentialGuard,
    identity: &Identity,
    model: &ModelRow,
) -> Result<Entitlement, ChatError> {
    let Some(user) = storage.user_by_email(&identity.subject).await? else {
        return Err(ChatError::StaleCredential);
    };

    if identity.version != user.version {
        return Err(ChatError::StaleCredential);
    }

    let allowed = model.allowed_role_names();

    if !allowed.iter().any(|name| name == identity.role.authority()) {
        return Err(ChatError::InsufficientRole);
    }

    // Models open to everyone never bother checking membership expiry; the
    // same goes for NORMAL and ADMIN callers.
    let open_to_normal = allowed.iter().any(|name| name == Role::Normal.authority());

    if identity.role.is_paid_tier() && !open_to_normal {
        let now = jiff::Timestamp::now().as_second();

        if now > user.membership_expiry {
            let won = storage.demote_lapsed_member(&user.email, user.version).await?;

            if !won {
                // A concurrent request for the same user already applied the
                // demotion; the re-read below observes its result.
                log::debug!("Demotion of {} already applied concurrently", user.email);
            }

            let Some(fresh) = storage.user_by_email(&user.email).await? else {
                return Err(ChatError::StaleCredential);
            };

            let role = Role::from_code(fresh.role).unwrap_or(Role::Normal);
            let token = guard.mint(&fresh.email, role, &fresh.name, fresh.version)?;

            log::info!("Membership of {} lapsed, account reset to {}", fresh.email, role.name());

            return Ok(Entitlement::Demoted { token });
        }
    }

    Ok(Entitlement::Allowed(user))
}

#[cfg(test)]
mod tests {
    use auth::Role;
    use storage::ModelRegistration;

    use super::*;
    use crate::tests::{test_guard, test_storage};

    async fn member_model(storage: &Storage, roles: &[&str]) -> ModelRow {
        storage
            .register_model(&ModelRegistration {
                name: "qwen-turbo".to_string(),
                kind: 0,
                provider: "bailian".to_string(),
                url: "https://dashscope.example/api".to_string(),
                parameters: serde_json::json!({}),
                allowed_roles: roles.iter().map(|role| role.to_string()).collect(),
                max_history: 10,
            })
            .await
            .unwrap()
    }

    async fn identity_for(storage: &Storage, guard: &CredentialGuard, email: &str) -> Identity {
        let user = storage.user_by_email(email).await.unwrap().unwrap();
        let role = Role::from_code(user.role).unwrap();
        let token = guard.mint(&user.email, role, &user.name, user.version).unwrap();

        guard.validate(&token).unwrap()
    }

    #[tokio::test]
    async fn allowed_iff_allow_list_contains_role() {
        let (storage, _dir) = test_storage().await;
        let guard = test_guard();

        storage.register_user("alice@example.com", None, "alice", "h").await.unwrap();
        let identity = identity_for(&storage, &guard, "alice@example.com").await;

        let closed = member_model(&storage, &["ROLE_MEMBER", "ROLE_ADMIN"]).await;
        let result = authorize(&storage, &guard, &identity, &closed).await;
        assert!(matches!(result, Err(ChatError::InsufficientRole)));
    }

    #[tokio::test]
    async fn stale_version_is_rejected_before_anything_else() {
        let (storage, _dir) = test_storage().await;
        let guard = test_guard();

        storage.register_user("alice@example.com", None, "alice", "h").await.unwrap();
        let identity = identity_for(&storage, &guard, "alice@example.com").await;

        // Logout-style bump invalidates the credential minted above.
        storage.bump_credential_version("alice@example.com").await.unwrap();

        let model = member_model(&storage, &["ROLE_NORMAL"]).await;
        let result = authorize(&storage, &guard, &identity, &model).await;
        assert!(matches!(result, Err(ChatError::StaleCredential)));
    }

    #[tokio::test]
    async fn lapsed_member_is_demoted_exactly_once() {
        let (storage, dir) = test_storage().await;
        let guard = test_guard();

        storage.register_user("bob@example.com", None, "bob", "h").await.unwrap();
        storage.grant_role("bob@example.com", Role::Member.code(), 30).await.unwrap();

        let identity = identity_for(&storage, &guard, "bob@example.com").await;

        // Force the membership into the past.
        let pool = sqlx::SqlitePool::connect(&format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("botgate-test.db").display()
        ))
        .await
        .unwrap();
        sqlx::query("UPDATE users SET membership_expiry = 1 WHERE email = 'bob@example.com'")
            .execute(&pool)
            .await
            .unwrap();

        let model = member_model(&storage, &["ROLE_MEMBER"]).await;

        let Entitlement::Demoted { token } = authorize(&storage, &guard, &identity, &model).await.unwrap() else {
            unreachable!("expected a demotion");
        };

        let user = storage.user_by_email("bob@example.com").await.unwrap().unwrap();
        assert_eq!(user.role, Role::Normal.code());
        assert_eq!(user.membership_expiry, 0);
        assert_eq!(user.version, identity.version + 1);

        // The replacement credential carries the demoted role and new version.
        let fresh = guard.validate(&token).unwrap();
        assert_eq!(fresh.role, Role::Normal);
        assert_eq!(fresh.version, user.version);

        // The pre-demotion credential is now fenced out.
        let result = authorize(&storage, &guard, &identity, &model).await;
        assert!(matches!(result, Err(ChatError::StaleCredential)));
    }

    #[tokio::test]
    async fn open_models_skip_the_expiry_check() {
        let (storage, dir) = test_storage().await;
        let guard = test_guard();

        storage.register_user("bob@example.com", None, "bob", "h").await.unwrap();
        storage.grant_role("bob@example.com", Role::Member.code(), 30).await.unwrap();

        let pool = sqlx::SqlitePool::connect(&format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("botgate-test.db").display()
        ))
        .await
        .unwrap();
        sqlx::query("UPDATE users SET membership_expiry = 1 WHERE email = 'bob@example.com'")
            .execute(&pool)
            .await
            .unwrap();

        let identity = identity_for(&storage, &guard, "bob@example.com").await;
        let open = member_model(&storage, &["ROLE_NORMAL", "ROLE_MEMBER"]).await;

        // Open to everyone: the lapsed membership goes unnoticed.
        let result = authorize(&storage, &guard, &identity, &open).await.unwrap();
        assert!(matches!(result, Entitlement::Allowed(_)));

        let user = storage.user_by_email("bob@example.com").await.unwrap().unwrap();
        assert_eq!(user.role, Role::Member.code());
    }
}
