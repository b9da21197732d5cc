//! AI model registry.
//!
//! Holds the validated set of AI backends (id → endpoint/model/secret). The set
//! is built off to the side and swapped in whole, so readers only ever see the
//! old or the new set. Secrets stay inside [`ModelConfig`]; everything handed
//! to outside callers goes through [`PublicModel`].

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;

/// Fields every model entry must carry as a non-empty string.
const REQUIRED_FIELDS: [&str; 5] = ["id", "display_name", "model", "base_url", "secret"];

/// Older documents name the credential `api_key`.
const LEGACY_SECRET_FIELD: &str = "api_key";

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("AI model config not found: {0}")]
    ConfigMissing(String),

    #[error("AI model config is malformed: {0}")]
    ConfigMalformed(String),

    #[error("AI model config is invalid: {0}")]
    ConfigInvalid(String),
}

/// One AI backend. Immutable once loaded.
#[derive(Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub id: String,
    pub display_name: String,
    pub model: String,
    pub base_url: String,
    secret: String,
}

impl ModelConfig {
    /// Credential used to authenticate against `base_url`.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn to_public(&self) -> PublicModel {
        PublicModel {
            id: self.id.clone(),
            display_name: self.display_name.clone(),
            model: self.model.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A model as seen from outside the trust boundary (no secret).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PublicModel {
    pub id: String,
    pub display_name: String,
    pub model: String,
    pub base_url: String,
}

/// Where a model document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// JSON file on disk (usually `ai_models.json`)
    File(PathBuf),
    /// JSON document held in memory
    Inline(String),
}

impl ModelSource {
    fn read(&self) -> Result<String, RegistryError> {
        match self {
            ModelSource::File(path) => {
                if !path.exists() {
                    return Err(RegistryError::ConfigMissing(format!(
                        "{} (create it from ai_models.example.json)",
                        path.display()
                    )));
                }
                std::fs::read_to_string(path).map_err(|e| {
                    RegistryError::ConfigMissing(format!("{}: {}", path.display(), e))
                })
            }
            ModelSource::Inline(text) => Ok(text.clone()),
        }
    }
}

/// A fully validated set of models, in document order.
#[derive(Debug, Default)]
struct ModelSet {
    ordered: Vec<Arc<ModelConfig>>,
    by_id: HashMap<String, Arc<ModelConfig>>,
}

/// Registry of AI model configurations.
///
/// Construct once at startup and share through an `Arc`.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<Arc<ModelSet>>,
    source: Mutex<Option<ModelSource>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a model document, replacing the current set.
    ///
    /// Validation is all-or-nothing: if any entry is rejected the current set
    /// is left untouched. Returns the number of models loaded.
    pub fn load(&self, source: ModelSource) -> Result<usize, RegistryError> {
        *self.source.lock().unwrap_or_else(PoisonError::into_inner) = Some(source.clone());

        let text = source.read()?;
        let set = parse_models(&text)?;
        let count = set.ordered.len();

        tracing::info!("Loaded {} AI model configurations", count);
        for config in &set.ordered {
            tracing::info!("  - {} ({})", config.display_name, config.id);
        }

        *self.models.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(set);

        Ok(count)
    }

    /// Re-run [`load`](Self::load) against the last source.
    ///
    /// Any `ModelConfig` handle fetched before the reload is stale afterwards.
    pub fn reload(&self) -> Result<usize, RegistryError> {
        let source = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| RegistryError::ConfigMissing("no source has been loaded yet".into()))?;

        self.load(source)
    }

    pub fn get(&self, id: &str) -> Option<Arc<ModelConfig>> {
        self.snapshot().by_id.get(id).cloned()
    }

    pub fn is_valid(&self, id: &str) -> bool {
        self.snapshot().by_id.contains_key(id)
    }

    /// All models in document order, secrets stripped
    pub fn list_public(&self) -> Vec<PublicModel> {
        self.snapshot()
            .ordered
            .iter()
            .map(|config| config.to_public())
            .collect()
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.snapshot()
            .ordered
            .iter()
            .map(|config| config.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<ModelSet> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn parse_models(text: &str) -> Result<ModelSet, RegistryError> {
    let document: Value = serde_json::from_str(text)
        .map_err(|e| RegistryError::ConfigMalformed(format!("invalid JSON: {}", e)))?;

    let entries = document
        .get("models")
        .ok_or_else(|| {
            RegistryError::ConfigMalformed("document must contain a 'models' array".into())
        })?
        .as_array()
        .ok_or_else(|| RegistryError::ConfigMalformed("'models' must be an array".into()))?;

    if entries.is_empty() {
        return Err(RegistryError::ConfigInvalid(
            "at least one AI model must be configured".into(),
        ));
    }

    let mut set = ModelSet::default();

    for (index, entry) in entries.iter().enumerate() {
        let config = parse_entry(entry).map_err(|reason| {
            RegistryError::ConfigInvalid(format!("model at index {}: {}", index, reason))
        })?;

        if set.by_id.contains_key(&config.id) {
            return Err(RegistryError::ConfigInvalid(format!(
                "duplicate model id: {}",
                config.id
            )));
        }

        let config = Arc::new(config);
        set.by_id.insert(config.id.clone(), config.clone());
        set.ordered.push(config);
    }

    Ok(set)
}

fn parse_entry(entry: &Value) -> Result<ModelConfig, String> {
    let entry = entry
        .as_object()
        .ok_or_else(|| "entry must be an object".to_string())?;

    let mut fields = HashMap::new();
    for field in REQUIRED_FIELDS {
        let value = match entry.get(field) {
            Some(value) => value,
            None if field == "secret" => entry
                .get(LEGACY_SECRET_FIELD)
                .ok_or_else(|| format!("missing required field: {}", field))?,
            None => return Err(format!("missing required field: {}", field)),
        };

        let value = value
            .as_str()
            .ok_or_else(|| format!("field '{}' must be a string", field))?;

        if value.trim().is_empty() {
            return Err(format!("field '{}' cannot be empty", field));
        }

        fields.insert(field, value.to_string());
    }

    let base_url = fields["base_url"].trim_end_matches('/').to_string();
    if base_url.is_empty() {
        return Err("field 'base_url' cannot be empty".to_string());
    }

    Ok(ModelConfig {
        id: fields["id"].clone(),
        display_name: fields["display_name"].clone(),
        model: fields["model"].clone(),
        base_url,
        secret: fields["secret"].clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_models() -> String {
        r#"{
            "models": [
                {
                    "id": "gpt",
                    "display_name": "GPT Trader",
                    "model": "gpt-4o-mini",
                    "base_url": "https://api.openai.com/v1/",
                    "secret": "sk-gpt"
                },
                {
                    "id": "deepseek",
                    "display_name": "DeepSeek Trader",
                    "model": "deepseek-chat",
                    "base_url": "https://api.deepseek.com",
                    "secret": "sk-deep"
                }
            ]
        }"#
        .to_string()
    }

    fn loaded() -> ModelRegistry {
        let registry = ModelRegistry::new();
        registry.load(ModelSource::Inline(two_models())).unwrap();
        registry
    }

    #[test]
    fn test_load_and_get() {
        let registry = loaded();

        assert_eq!(registry.len(), 2);

        let gpt = registry.get("gpt").unwrap();
        assert_eq!(gpt.display_name, "GPT Trader");
        assert_eq!(gpt.model, "gpt-4o-mini");
        assert_eq!(gpt.secret(), "sk-gpt");

        let deepseek = registry.get("deepseek").unwrap();
        assert_eq!(deepseek.base_url, "https://api.deepseek.com");
        assert_eq!(deepseek.secret(), "sk-deep");

        assert!(registry.get("claude").is_none());
    }

    #[test]
    fn test_trailing_slash_removed() {
        let registry = loaded();
        assert_eq!(registry.get("gpt").unwrap().base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn test_list_public_strips_secret() {
        let registry = loaded();
        let models = registry.list_public();

        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "gpt");
        assert_eq!(models[1].id, "deepseek");

        let json = serde_json::to_string(&models).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("sk-gpt"));
        assert!(!json.contains("sk-deep"));
    }

    #[test]
    fn test_is_valid() {
        let registry = loaded();
        assert!(registry.is_valid("gpt"));
        assert!(!registry.is_valid("unknown"));
        assert_eq!(registry.model_ids(), vec!["gpt", "deepseek"]);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let registry = loaded();
        let debug = format!("{:?}", registry.get("gpt").unwrap());
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("sk-gpt"));
    }

    #[test]
    fn test_duplicate_id_keeps_previous_set() {
        let registry = loaded();

        let duplicate = r#"{"models": [
            {"id": "a", "display_name": "A", "model": "m", "base_url": "http://a", "secret": "s"},
            {"id": "a", "display_name": "A2", "model": "m", "base_url": "http://a", "secret": "s"}
        ]}"#;

        let result = registry.load(ModelSource::Inline(duplicate.to_string()));
        assert!(matches!(result, Err(RegistryError::ConfigInvalid(_))));

        assert_eq!(registry.len(), 2);
        assert!(registry.is_valid("gpt"));
        assert!(!registry.is_valid("a"));
    }

    #[test]
    fn test_missing_base_url_rejects_whole_document() {
        let registry = ModelRegistry::new();

        let document = r#"{"models": [
            {"id": "ok", "display_name": "OK", "model": "m", "base_url": "http://ok", "secret": "s"},
            {"id": "broken", "display_name": "Broken", "model": "m", "secret": "s"}
        ]}"#;

        let result = registry.load(ModelSource::Inline(document.to_string()));
        match result {
            Err(RegistryError::ConfigInvalid(msg)) => {
                assert!(msg.contains("index 1"));
                assert!(msg.contains("base_url"));
            }
            other => panic!("expected ConfigInvalid, got {:?}", other),
        }

        assert!(registry.get("ok").is_none());
        assert!(registry.get("broken").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_empty_and_non_string_fields() {
        let registry = ModelRegistry::new();

        let empty_list = r#"{"models": []}"#;
        assert!(matches!(
            registry.load(ModelSource::Inline(empty_list.into())),
            Err(RegistryError::ConfigInvalid(_))
        ));

        let blank = r#"{"models": [
            {"id": "x", "display_name": "  ", "model": "m", "base_url": "http://x", "secret": "s"}
        ]}"#;
        assert!(matches!(
            registry.load(ModelSource::Inline(blank.into())),
            Err(RegistryError::ConfigInvalid(_))
        ));

        let numeric = r#"{"models": [
            {"id": 7, "display_name": "X", "model": "m", "base_url": "http://x", "secret": "s"}
        ]}"#;
        assert!(matches!(
            registry.load(ModelSource::Inline(numeric.into())),
            Err(RegistryError::ConfigInvalid(_))
        ));

        let not_object = r#"{"models": ["gpt"]}"#;
        assert!(matches!(
            registry.load(ModelSource::Inline(not_object.into())),
            Err(RegistryError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_malformed_documents() {
        let registry = ModelRegistry::new();

        for document in ["not json", r#"{"model": []}"#, r#"{"models": {}}"#] {
            assert!(matches!(
                registry.load(ModelSource::Inline(document.into())),
                Err(RegistryError::ConfigMalformed(_))
            ));
        }
    }

    #[test]
    fn test_legacy_api_key_field() {
        let registry = ModelRegistry::new();
        let document = r#"{"models": [
            {"id": "old", "display_name": "Old", "model": "m", "base_url": "http://old", "api_key": "k"}
        ]}"#;

        registry.load(ModelSource::Inline(document.into())).unwrap();
        assert_eq!(registry.get("old").unwrap().secret(), "k");
    }

    #[test]
    fn test_missing_file() {
        let registry = ModelRegistry::new();
        let path = std::env::temp_dir().join(format!("missing-{}.json", uuid::Uuid::new_v4()));

        assert!(matches!(
            registry.load(ModelSource::File(path)),
            Err(RegistryError::ConfigMissing(_))
        ));
    }

    #[test]
    fn test_reload_from_file() {
        let path = std::env::temp_dir().join(format!("models-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, two_models()).unwrap();

        let registry = ModelRegistry::new();
        registry.load(ModelSource::File(path.clone())).unwrap();
        let before = registry.get("gpt").unwrap();

        let single = r#"{"models": [
            {"id": "gpt", "display_name": "GPT v2", "model": "gpt-4o", "base_url": "http://x", "secret": "s2"}
        ]}"#;
        std::fs::write(&path, single).unwrap();

        assert_eq!(registry.reload().unwrap(), 1);
        assert!(!registry.is_valid("deepseek"));
        assert_eq!(registry.get("gpt").unwrap().display_name, "GPT v2");

        // Old handles keep pointing at the old set
        assert_eq!(before.display_name, "GPT Trader");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_reload_without_source() {
        let registry = ModelRegistry::new();
        assert!(matches!(
            registry.reload(),
            Err(RegistryError::ConfigMissing(_))
        ));
    }
}
