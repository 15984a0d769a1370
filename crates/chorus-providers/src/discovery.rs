//! Model discovery — validate configured models and cache the results.
//!
//! Validation results land in `<home>/available_models.json` so agent
//! configuration commands can offer choices without a network round trip
//! every time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::http_provider::HttpProvider;
use crate::traits::LlmProvider;

/// Cached validation results, one entry per provider display name.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    /// Provider name → model ids the provider reported.
    pub providers: BTreeMap<String, Vec<String>>,
    /// When the catalog was last refreshed (ISO-8601 UTC).
    pub refreshed_at: Option<String>,
}

impl ModelCatalog {
    /// Load the cache file, or an empty catalog if absent or unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "model cache unreadable, starting fresh");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Persist the catalog.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)
    }

    /// Whether any cached provider reports this model id.
    pub fn is_known_model(&self, model: &str) -> bool {
        self.providers.values().any(|models| models.iter().any(|m| m == model))
    }

    /// Every model id across providers, sorted and deduplicated.
    pub fn all_models(&self) -> Vec<String> {
        let mut all: Vec<String> = self
            .providers
            .values()
            .flat_map(|models| models.iter().cloned())
            .collect();
        all.sort();
        all.dedup();
        all
    }
}

/// Refresh the catalog from the given providers and write it to `cache_path`.
///
/// Providers that fail to list are skipped with a warning; their previous
/// entries are kept so a transient outage doesn't blank the cache.
pub async fn refresh_catalog(
    providers: &[&HttpProvider],
    cache_path: PathBuf,
) -> ModelCatalog {
    let mut catalog = ModelCatalog::load(&cache_path);

    for provider in providers {
        match provider.list_models().await {
            Ok(mut models) => {
                models.sort();
                info!(
                    provider = provider.display_name(),
                    count = models.len(),
                    "validated provider models"
                );
                catalog
                    .providers
                    .insert(provider.display_name().to_string(), models);
            }
            Err(e) => {
                warn!(
                    provider = provider.display_name(),
                    error = %e,
                    "model listing failed, keeping cached entries"
                );
            }
        }
    }

    catalog.refreshed_at = Some(chorus_core::utils::timestamp());
    if let Err(e) = catalog.save(&cache_path) {
        warn!(error = %e, "failed to write model cache");
    }
    catalog
}
