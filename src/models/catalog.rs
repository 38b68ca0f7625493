//! Provider model catalog.
//!
//! Fetches the provider's `/models` listing at startup and hourly after,
//! keeping the parsed entries in an in-memory cache. The config page reads
//! the cache for the provider/model pickers and to decide whether the
//! selected model accepts image input. A failed fetch keeps the previous
//! cache; request handling never waits on a refresh.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProviderModel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub context_length: Option<u64>,
    #[serde(default)]
    pub architecture: Option<ModelArchitecture>,
}

impl ProviderModel {
    /// Models are listed as `provider/model`; the prefix is the provider.
    pub fn provider(&self) -> Option<&str> {
        self.id.split_once('/').map(|(provider, _)| provider)
    }

    pub fn accepts_images(&self) -> bool {
        self.architecture
            .as_ref()
            .map(|arch| arch.input_modalities.iter().any(|m| m == "image"))
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModelArchitecture {
    #[serde(default)]
    pub modality: Option<String>,
    #[serde(default)]
    pub input_modalities: Vec<String>,
    #[serde(default)]
    pub output_modalities: Vec<String>,
}

#[derive(Deserialize)]
struct ModelListing {
    data: Vec<ProviderModel>,
}

pub struct ModelCatalog {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    cached: Mutex<Arc<Vec<ProviderModel>>>,
}

impl ModelCatalog {
    pub fn new(api_url: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url,
            api_key,
            cached: Mutex::new(Arc::new(Vec::new())),
        }
    }

    pub fn cached(&self) -> Arc<Vec<ProviderModel>> {
        self.cached.lock().unwrap().clone()
    }

    fn install(&self, models: Vec<ProviderModel>) {
        *self.cached.lock().unwrap() = Arc::new(models);
    }

    pub fn accepts_images(&self, model_id: &str) -> bool {
        self.cached()
            .iter()
            .find(|m| m.id == model_id)
            .map(|m| m.accepts_images())
            .unwrap_or(false)
    }

    /// Sorted, de-duplicated provider prefixes across the cache.
    pub fn providers(&self) -> Vec<String> {
        let set: BTreeSet<String> = self
            .cached()
            .iter()
            .filter_map(|m| m.provider().map(|p| p.to_string()))
            .collect();
        set.into_iter().collect()
    }

    pub fn models_for_provider(&self, provider: &str) -> Vec<ProviderModel> {
        let prefix = format!("{provider}/");
        self.cached()
            .iter()
            .filter(|m| m.id.starts_with(&prefix))
            .cloned()
            .collect()
    }

    /// Fetch the listing and replace the cache; on failure the previous
    /// cache stays in place.
    pub async fn refresh(&self) {
        match self.fetch().await {
            Ok(models) => {
                log::info!(target: "models", "fetched {} models", models.len());
                self.install(models);
            }
            Err(err) => {
                log::warn!(target: "models", "model listing fetch failed: {err}");
            }
        }
    }

    async fn fetch(&self) -> Result<Vec<ProviderModel>, reqwest::Error> {
        let listing: ModelListing = self
            .http
            .get(format!("{}/models", self.api_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(listing.data)
    }

    /// Refresh now, then hourly, on a detached task.
    pub fn spawn_refresh_loop(self: &Arc<Self>) {
        let catalog = self.clone();
        tokio::spawn(async move {
            loop {
                catalog.refresh().await;
                tokio::time::sleep(REFRESH_INTERVAL).await;
            }
        });
    }
}
