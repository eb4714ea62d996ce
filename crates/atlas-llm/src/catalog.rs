//! The registry of models a deployment can route turns to.

use atlas_core::model::{ModelDescriptor, Provider};
use serde::Serialize;

/// What the session API exposes about a model; never the key or endpoint.
#[derive(Clone, Debug, Serialize)]
pub struct ModelSummary {
    pub id: String,
    pub display_name: String,
    pub provider: Provider,
}

/// Immutable set of configured models plus the deployment default.
///
/// Built once at startup from the built-in entries and any config-file
/// overrides; sessions refer to models by catalog id only.
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
    default_id: String,
}

impl ModelCatalog {
    /// The stock lineup: one entry per supported protocol. API keys are
    /// filled in by the config layer, not here.
    pub fn builtin() -> Self {
        let models = vec![
            ModelDescriptor::new("gpt-4o-mini", "GPT-4o mini", Provider::OpenAi, "gpt-4o-mini"),
            ModelDescriptor::new("gpt-4o", "GPT-4o", Provider::OpenAi, "gpt-4o"),
            ModelDescriptor::new(
                "claude-3-5-sonnet",
                "Claude 3.5 Sonnet",
                Provider::Anthropic,
                "claude-3-5-sonnet-latest",
            ),
            ModelDescriptor::new(
                "gemini-1.5-flash",
                "Gemini 1.5 Flash",
                Provider::Google,
                "gemini-1.5-flash",
            ),
            ModelDescriptor::new(
                "llama3",
                "Llama 3 (local)",
                Provider::OpenAiCompatible,
                "llama3",
            )
            .with_base_url("http://localhost:11434/v1"),
        ];
        Self {
            models,
            default_id: "gpt-4o-mini".to_string(),
        }
    }

    /// Build from explicit entries. Fails if `default_id` names no entry or
    /// two entries share an id.
    pub fn from_entries(
        models: Vec<ModelDescriptor>,
        default_id: impl Into<String>,
    ) -> Result<Self, String> {
        let default_id = default_id.into();
        for (i, model) in models.iter().enumerate() {
            if models[..i].iter().any(|m| m.id == model.id) {
                return Err(format!("duplicate model id '{}'", model.id));
            }
        }
        if !models.iter().any(|m| m.id == default_id) {
            return Err(format!("default model '{default_id}' is not in the catalog"));
        }
        Ok(Self { models, default_id })
    }

    /// Replace or append entries, optionally moving the default.
    pub fn with_overrides(
        mut self,
        overrides: Vec<ModelDescriptor>,
        default_id: Option<String>,
    ) -> Result<Self, String> {
        for entry in overrides {
            match self.models.iter_mut().find(|m| m.id == entry.id) {
                Some(existing) => *existing = entry,
                None => self.models.push(entry),
            }
        }
        if let Some(id) = default_id {
            if !self.models.iter().any(|m| m.id == id) {
                return Err(format!("default model '{id}' is not in the catalog"));
            }
            self.default_id = id;
        }
        Ok(self)
    }

    /// Patch the API key of every entry for `provider` that lacks one.
    pub fn fill_missing_keys(&mut self, provider: Provider, key: &str) {
        for model in &mut self.models {
            if model.provider == provider && model.api_key.is_none() {
                model.api_key = Some(key.to_string().into());
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn default_id(&self) -> &str {
        &self.default_id
    }

    pub fn default_model(&self) -> &ModelDescriptor {
        self.get(&self.default_id)
            .unwrap_or_else(|| unreachable!("default model id validated at construction"))
    }

    /// Public listing for the session API, in catalog order.
    pub fn list(&self) -> Vec<ModelSummary> {
        self.models
            .iter()
            .map(|m| ModelSummary {
                id: m.id.clone(),
                display_name: m.display_name.clone(),
                provider: m.provider,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
