pub mod dispatch;

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::ModelEntry;

/// A model as exposed to callers.
#[derive(Debug, Clone)]
pub struct CatalogModel {
    pub name: Arc<str>,
    pub provider: Arc<str>,
    pub upstream_model: Arc<str>,
}

/// Pre-built catalog index from caller-visible model names to upstream identifiers.
#[derive(Debug, Clone)]
pub struct ModelRouter {
    /// Catalog in configuration order.
    models: Vec<CatalogModel>,
    by_name: FxHashMap<Arc<str>, usize>,
}

impl ModelRouter {
    #[must_use]
    pub fn new(entries: &[ModelEntry]) -> Self {
        let mut models = Vec::with_capacity(entries.len());
        let mut by_name = FxHashMap::default();
        for entry in entries {
            let model = CatalogModel {
                name: Arc::from(entry.name.as_str()),
                provider: Arc::from(entry.provider.as_str()),
                upstream_model: Arc::from(entry.upstream_model.as_str()),
            };
            by_name.entry(model.name.clone()).or_insert(models.len());
            models.push(model);
        }
        Self { models, by_name }
    }

    /// Map a caller-visible name to the upstream identifier.
    ///
    /// Names outside the catalog are forwarded unchanged.
    #[must_use]
    pub fn resolve<'a>(&'a self, requested: &'a str) -> &'a str {
        match self.by_name.get(requested) {
            Some(&index) => &self.models[index].upstream_model,
            None => {
                debug!(model = requested, "model not in catalog; forwarding name unchanged");
                requested
            }
        }
    }

    #[cfg(test)]
    fn is_known(&self, requested: &str) -> bool {
        self.by_name.contains_key(requested)
    }

    #[must_use]
    pub fn models(&self) -> &[CatalogModel] {
        &self.models
    }

    #[must_use]
    pub fn known_model_count(&self) -> usize {
        self.models.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_models;

    #[test]
    fn test_resolve_catalog_names() {
        let router = ModelRouter::new(&default_models());
        assert_eq!(router.known_model_count(), 11);
        assert_eq!(
            router.resolve("claude-3-5-sonnet-20240620"),
            "anthropic.claude-3-5-sonnet-20240620-v1:0"
        );
        assert_eq!(
            router.resolve("gemini-1.5-pro-latest"),
            "models/gemini-1.5-pro-latest"
        );
        assert_eq!(router.resolve("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn test_unknown_model_is_forwarded_unchanged() {
        let router = ModelRouter::new(&default_models());
        assert!(!router.is_known("my-custom-model"));
        assert_eq!(router.resolve("my-custom-model"), "my-custom-model");
        assert_eq!(router.resolve(""), "");
    }

    #[test]
    fn test_catalog_order_is_preserved() {
        let router = ModelRouter::new(&default_models());
        let names: Vec<&str> = router.models().iter().map(|m| m.name.as_ref()).collect();
        assert_eq!(names.first(), Some(&"gpt-4-turbo-2024-04-09"));
        assert_eq!(names.last(), Some(&"mistral-large-2407"));
    }
}
