use sqlx::FromRow;
use uuid::Uuid;

use crate::{Result, Storage, now_epoch};

/// A user row as stored.
///
/// `role` is the integer tier code (0 NORMAL, 1 MEMBER, 2 SUPER_MEMBER,
/// 3 ADMIN); `membership_expiry` is epoch seconds, 0 meaning no paid
/// membership; `version` fences out credentials minted before the last
/// privilege-affecting event.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    /// Row id.
    pub id: i64,
    /// Stable external identifier used for conversation attribution.
    pub uuid: String,
    /// Unique login identifier.
    pub email: String,
    /// Optional unique phone number.
    pub phone: Option<String>,
    /// Display name.
    pub name: String,
    /// bcrypt hash of the password.
    pub password_hash: String,
    /// Role tier code.
    pub role: i64,
    /// Credential fencing counter.
    pub version: i64,
    /// Paid membership expiry, epoch seconds, 0 = none.
    pub membership_expiry: i64,
    /// Last successful login, epoch seconds.
    pub last_login: i64,
    /// Row creation time, epoch seconds.
    pub created_at: i64,
    /// Last mutation time, epoch seconds.
    pub updated_at: i64,
}

impl Storage {
    /// Insert a new NORMAL-tier user with a fresh external id.
    pub async fn register_user(
        &self,
        email: &str,
        phone: Option<&str>,
        name: &str,
        password_hash: &str,
    ) -> Result<UserRow> {
        let now = now_epoch();
        let uuid = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO users (uuid, email, phone, name, password_hash, role, version,
                               membership_expiry, last_login, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, 0, 0, ?6, ?6)
            "#,
        )
        .bind(&uuid)
        .bind(email)
        .bind(phone)
        .bind(name)
        .bind(password_hash)
        .bind(now)
        .execute(self.pool())
        .await?;

        let user = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?1")
            .bind(email)
            .fetch_one(self.pool())
            .await?;

        Ok(user)
    }

    /// Look up a user by email.
    pub async fn user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?1")
            .bind(email)
            .fetch_optional(self.pool())
            .await?;

        Ok(row)
    }

    /// Look up a user by external id.
    pub async fn user_by_uuid(&self, uuid: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE uuid = ?1")
            .bind(uuid)
            .fetch_optional(self.pool())
            .await?;

        Ok(row)
    }

    /// Look up a user by phone number.
    pub async fn user_by_phone(&self, phone: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE phone = ?1")
            .bind(phone)
            .fetch_optional(self.pool())
            .await?;

        Ok(row)
    }

    /// Whether a user with this email already exists.
    pub async fn email_exists(&self, email: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?1")
            .bind(email)
            .fetch_one(self.pool())
            .await?;

        Ok(count > 0)
    }

    /// Whether a user with this phone number already exists.
    pub async fn phone_exists(&self, phone: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE phone = ?1")
            .bind(phone)
            .fetch_one(self.pool())
            .await?;

        Ok(count > 0)
    }

    /// Current fencing version for the subject, if the user exists.
    pub async fn credential_version(&self, email: &str) -> Result<Option<i64>> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM users WHERE email = ?1")
            .bind(email)
            .fetch_optional(self.pool())
            .await?;

        Ok(version)
    }

    /// Bump the fencing version, invalidating every outstanding credential.
    /// Used on logout and by role mutations.
    pub async fn bump_credential_version(&self, email: &str) -> Result<()> {
        sqlx::query("UPDATE users SET version = version + 1, updated_at = ?1 WHERE email = ?2")
            .bind(now_epoch())
            .bind(email)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Stamp a successful login.
    pub async fn touch_last_login(&self, email: &str) -> Result<()> {
        sqlx::query("UPDATE users SET last_login = ?1 WHERE email = ?2")
            .bind(now_epoch())
            .bind(email)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Grant a role tier, computing the membership expiry from the day grant.
    ///
    /// NORMAL and ADMIN carry no expiry; paid tiers expire `days` from now.
    /// The fencing version is not touched here; callers decide whether the
    /// change must invalidate outstanding credentials.
    pub async fn grant_role(&self, email: &str, role_code: i64, days: u32) -> Result<()> {
        let now = now_epoch();

        let expiry = if role_code == 1 || role_code == 2 {
            now + i64::from(days) * 86400
        } else {
            0
        };

        sqlx::query("UPDATE users SET role = ?1, membership_expiry = ?2, updated_at = ?3 WHERE email = ?4")
            .bind(role_code)
            .bind(expiry)
            .bind(now)
            .bind(email)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Compare-and-set demotion of a lapsed paid member.
    ///
    /// Resets the row to NORMAL with no expiry and bumps the fencing version,
    /// but only if the row's version still equals `expected_version`. Returns
    /// whether this caller won the update; losers must re-read the row, since
    /// a concurrent request has already performed the demotion.
    pub async fn demote_lapsed_member(&self, email: &str, expected_version: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET role = 0, membership_expiry = 0, version = version + 1, updated_at = ?1
            WHERE email = ?2 AND version = ?3
            "#,
        )
        .bind(now_epoch())
        .bind(email)
        .bind(expected_version)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use crate::tests::test_storage;

    #[tokio::test]
    async fn register_and_lookup() {
        let (storage, _dir) = test_storage().await;

        let user = storage
            .register_user("alice@example.com", Some("1234567"), "alice", "$2b$hash")
            .await
            .unwrap();

        assert_eq!(user.role, 0);
        assert_eq!(user.version, 0);
        assert_eq!(user.membership_expiry, 0);

        assert!(storage.email_exists("alice@example.com").await.unwrap());
        assert!(storage.phone_exists("1234567").await.unwrap());
        assert!(!storage.email_exists("bob@example.com").await.unwrap());

        let by_uuid = storage.user_by_uuid(&user.uuid).await.unwrap().unwrap();
        assert_eq!(by_uuid.email, "alice@example.com");
    }

    #[tokio::test]
    async fn version_bump_invalidates() {
        let (storage, _dir) = test_storage().await;
        storage
            .register_user("alice@example.com", None, "alice", "$2b$hash")
            .await
            .unwrap();

        assert_eq!(storage.credential_version("alice@example.com").await.unwrap(), Some(0));

        storage.bump_credential_version("alice@example.com").await.unwrap();

        assert_eq!(storage.credential_version("alice@example.com").await.unwrap(), Some(1));
        assert_eq!(storage.credential_version("nobody@example.com").await.unwrap(), None);
    }

    #[tokio::test]
    async fn demotion_is_compare_and_set() {
        let (storage, _dir) = test_storage().await;
        storage
            .register_user("alice@example.com", None, "alice", "$2b$hash")
            .await
            .unwrap();
        storage.grant_role("alice@example.com", 1, 30).await.unwrap();

        // First caller with the current version wins.
        assert!(storage.demote_lapsed_member("alice@example.com", 0).await.unwrap());

        // A concurrent caller holding the now-stale version loses.
        assert!(!storage.demote_lapsed_member("alice@example.com", 0).await.unwrap());

        let user = storage.user_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(user.role, 0);
        assert_eq!(user.membership_expiry, 0);
        assert_eq!(user.version, 1);
    }

    #[tokio::test]
    async fn grant_role_sets_expiry_for_paid_tiers_only() {
        let (storage, _dir) = test_storage().await;
        storage
            .register_user("alice@example.com", None, "alice", "$2b$hash")
            .await
            .unwrap();

        storage.grant_role("alice@example.com", 2, 365).await.unwrap();
        let user = storage.user_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(user.role, 2);
        assert!(user.membership_expiry > 0);

        storage.grant_role("alice@example.com", 3, 365).await.unwrap();
        let user = storage.user_by_email("alice@example.com").await.unwrap().unwrap();
        assert_eq!(user.role, 3);
        assert_eq!(user.membership_expiry, 0);
    }
}
