use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// A row from the `prompt_templates` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PromptTemplate {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub template: String,
    pub variables: Option<Vec<String>>,
    pub is_public: bool,
    /// `None` for system templates.
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub usage_count: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewPromptTemplate {
    pub title: String,
    pub description: String,
    pub category: String,
    pub template: String,
    pub variables: Vec<String>,
    pub is_public: bool,
    pub user_id: Option<Uuid>,
}
