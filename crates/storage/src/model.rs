use sqlx::FromRow;

use crate::{Result, Storage, now_epoch};

/// A registered model as stored.
///
/// `provider` selects the upstream reframer; `parameters` is the opaque
/// provider-shaped parameter object passed through to the upstream request;
/// `allowed_roles` is a JSON array of `ROLE_*` names.
#[derive(Debug, Clone, FromRow)]
pub struct ModelRow {
    /// Row id.
    pub id: i64,
    /// Unique model name clients request by.
    pub name: String,
    /// Modality code: 0 text, 1 image, 2 audio, 3 video.
    pub kind: i64,
    /// Upstream platform identifier, e.g. `qianfan` or `bailian`.
    pub provider: String,
    /// Streaming endpoint URL.
    pub url: String,
    /// Provider-shaped static parameters, JSON object as text.
    pub parameters: String,
    /// JSON array of `ROLE_*` names entitled to this model.
    pub allowed_roles: String,
    /// Upper bound on history exchanges merged into a request.
    pub max_history: i64,
    /// Row creation time, epoch seconds.
    pub created_at: i64,
}

impl ModelRow {
    /// Parse the allow-list column.
    pub fn allowed_role_names(&self) -> Vec<String> {
        serde_json::from_str(&self.allowed_roles).unwrap_or_default()
    }
}

/// Fields accepted when registering a model.
#[derive(Debug, Clone)]
pub struct ModelRegistration {
    /// Unique model name.
    pub name: String,
    /// Modality code.
    pub kind: i64,
    /// Upstream platform identifier.
    pub provider: String,
    /// Streaming endpoint URL.
    pub url: String,
    /// Provider-shaped static parameters as a JSON object.
    pub parameters: serde_json::Value,
    /// `ROLE_*` names entitled to this model.
    pub allowed_roles: Vec<String>,
    /// Upper bound on history exchanges.
    pub max_history: i64,
}

impl Storage {
    /// Register a model; fails if the name is taken.
    pub async fn register_model(&self, registration: &ModelRegistration) -> Result<ModelRow> {
        sqlx::query(
            r#"
            INSERT INTO models (name, kind, provider, url, parameters, allowed_roles, max_history, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&registration.name)
        .bind(registration.kind)
        .bind(&registration.provider)
        .bind(&registration.url)
        .bind(registration.parameters.to_string())
        .bind(serde_json::to_string(&registration.allowed_roles).unwrap_or_else(|_| "[]".to_string()))
        .bind(registration.max_history)
        .bind(now_epoch())
        .execute(self.pool())
        .await?;

        let row = sqlx::query_as::<_, ModelRow>("SELECT * FROM models WHERE name = ?1")
            .bind(&registration.name)
            .fetch_one(self.pool())
            .await?;

        Ok(row)
    }

    /// Look up a model by name.
    pub async fn model_by_name(&self, name: &str) -> Result<Option<ModelRow>> {
        let row = sqlx::query_as::<_, ModelRow>("SELECT * FROM models WHERE name = ?1")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;

        Ok(row)
    }

    /// List all registered models.
    pub async fn list_models(&self) -> Result<Vec<ModelRow>> {
        let rows = sqlx::query_as::<_, ModelRow>("SELECT * FROM models ORDER BY name")
            .fetch_all(self.pool())
            .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ModelRegistration;
    use crate::tests::test_storage;

    #[tokio::test]
    async fn register_and_fetch() {
        let (storage, _dir) = test_storage().await;

        let registration = ModelRegistration {
            name: "qwen-turbo".to_string(),
            kind: 0,
            provider: "bailian".to_string(),
            url: "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation".to_string(),
            parameters: json!({"model": "qwen-turbo", "parameters": {"temperature": 0.7}}),
            allowed_roles: vec!["ROLE_MEMBER".to_string(), "ROLE_ADMIN".to_string()],
            max_history: 10,
        };

        storage.register_model(&registration).await.unwrap();

        let row = storage.model_by_name("qwen-turbo").await.unwrap().unwrap();
        assert_eq!(row.provider, "bailian");
        assert_eq!(row.allowed_role_names(), vec!["ROLE_MEMBER", "ROLE_ADMIN"]);
        assert_eq!(row.max_history, 10);

        assert!(storage.model_by_name("missing").await.unwrap().is_none());
        assert_eq!(storage.list_models().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let (storage, _dir) = test_storage().await;

        let registration = ModelRegistration {
            name: "ernie-speed".to_string(),
            kind: 0,
            provider: "qianfan".to_string(),
            url: "https://qianfan.baidubce.com/v2/chat/completions".to_string(),
            parameters: json!({}),
            allowed_roles: vec!["ROLE_NORMAL".to_string()],
            max_history: 6,
        };

        storage.register_model(&registration).await.unwrap();
        assert!(storage.register_model(&registration).await.is_err());
    }
}
