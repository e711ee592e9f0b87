use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub title: String,
    pub description: String,
    pub category: String,
    pub template: String,
    /// Defaults to the placeholders found in `template`.
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Deserialize)]
pub struct RenderRequest {
    #[serde(default)]
    pub values: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct RenderResponse {
    pub prompt: String,
}
