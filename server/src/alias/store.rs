//! Alias store (C3, spec §4.3).
//!
//! Grounded on `server/alias_storage.py`'s `AliasStorage`: per-player JSON
//! records on disk, an in-memory cache flushed on every mutating call.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;

use super::graph::AliasGraph;
use super::model::{Alias, AliasBundle, AliasValidationError, ALIAS_BUNDLE_MAX_LEN};

#[derive(Debug, Error)]
pub enum AliasStoreError {
    #[error(transparent)]
    Validation(#[from] AliasValidationError),
    #[error("alias limit of {ALIAS_BUNDLE_MAX_LEN} reached")]
    LimitReached,
    #[error("persistence error: {0}")]
    Persistence(String),
}

/// Durable per-player alias persistence (spec §4.3, §6). Out-of-core
/// collaborators (a database-backed store, say) can provide their own
/// implementation; this crate ships the JSON-file one the on-disk format
/// in spec §6 describes.
#[async_trait]
pub trait AliasPersistence: Send + Sync {
    async fn load(&self, player: &str) -> AliasBundle;
    async fn save(&self, player: &str, bundle: &AliasBundle) -> Result<(), AliasStoreError>;
}

/// JSON-file alias persistence, one `{playerName}_aliases.json` per player
/// under a configured directory (spec §6). Corrupt records are treated as
/// empty and logged, never raised (spec §4.3).
pub struct JsonFileAliasPersistence {
    directory: PathBuf,
}

impl JsonFileAliasPersistence {
    /// `ALIASES_DIR` absence is a fatal startup error (spec §6); the
    /// caller is expected to have already read the environment variable
    /// and decided to abort if it was missing (see `lifecycle`).
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into() }
    }

    fn path_for(&self, player: &str) -> PathBuf {
        self.directory.join(format!("{player}_aliases.json"))
    }
}

#[async_trait]
impl AliasPersistence for JsonFileAliasPersistence {
    async fn load(&self, player: &str) -> AliasBundle {
        let path = self.path_for(player);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => match serde_json::from_str::<AliasBundle>(&contents) {
                Ok(bundle) => bundle,
                Err(err) => {
                    tracing::error!(player, error = %err, "corrupt alias record, treating as empty");
                    AliasBundle::empty()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => AliasBundle::empty(),
            Err(err) => {
                tracing::error!(player, error = %err, "failed to read alias record, treating as empty");
                AliasBundle::empty()
            }
        }
    }

    async fn save(&self, player: &str, bundle: &AliasBundle) -> Result<(), AliasStoreError> {
        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|e| AliasStoreError::Persistence(e.to_string()))?;
        let json = serde_json::to_string_pretty(bundle).map_err(|e| AliasStoreError::Persistence(e.to_string()))?;
        tokio::fs::write(self.path_for(player), json)
            .await
            .map_err(|e| AliasStoreError::Persistence(e.to_string()))
    }
}

/// In-memory cache over a persistence collaborator, serialized per player
/// (spec §5: "Alias store caches are serialized per player").
pub struct AliasStore {
    persistence: Arc<dyn AliasPersistence>,
    cache: Mutex<HashMap<String, AliasBundle>>,
}

impl AliasStore {
    pub fn new(persistence: Arc<dyn AliasPersistence>) -> Self {
        Self { persistence, cache: Mutex::new(HashMap::new()) }
    }

    async fn load_cached(&self, player: &str) -> AliasBundle {
        let mut cache = self.cache.lock().await;
        if let Some(bundle) = cache.get(player) {
            return bundle.clone();
        }
        let bundle = self.persistence.load(player).await;
        cache.insert(player.to_string(), bundle.clone());
        bundle
    }

    pub async fn get(&self, player: &str, name: &str) -> Option<Alias> {
        self.load_cached(player).await.get(name).cloned()
    }

    pub async fn list(&self, player: &str) -> AliasBundle {
        self.load_cached(player).await
    }

    pub async fn add(&self, player: &str, name: &str, body: &str) -> Result<Alias, AliasStoreError> {
        let mut bundle = self.load_cached(player).await;
        let now = Utc::now();
        let alias = Alias::new(name, body, now)?;

        match bundle.aliases.iter_mut().find(|a| a.name.eq_ignore_ascii_case(name)) {
            Some(existing) => {
                existing.body = alias.body.clone();
                existing.updated_at = now;
            }
            None => {
                if bundle.aliases.len() >= ALIAS_BUNDLE_MAX_LEN {
                    return Err(AliasStoreError::LimitReached);
                }
                bundle.aliases.push(alias.clone());
            }
        }

        self.persist(player, bundle).await?;
        Ok(alias)
    }

    pub async fn remove(&self, player: &str, name: &str) -> Result<bool, AliasStoreError> {
        let mut bundle = self.load_cached(player).await;
        let before = bundle.aliases.len();
        bundle.aliases.retain(|a| !a.name.eq_ignore_ascii_case(name));
        let removed = bundle.aliases.len() != before;
        if removed {
            self.persist(player, bundle).await?;
        }
        Ok(removed)
    }

    async fn persist(&self, player: &str, bundle: AliasBundle) -> Result<(), AliasStoreError> {
        self.persistence.save(player, &bundle).await?;
        self.cache.lock().await.insert(player.to_string(), bundle);
        Ok(())
    }

    /// Rebuilds the dependency graph for `player` (spec §4.4: re-evaluated
    /// after every add/remove).
    pub async fn graph(&self, player: &str) -> AliasGraph {
        AliasGraph::build(&self.load_cached(player).await)
    }

    /// Resets `player`'s bundle to empty (spec §4.3). Idempotent: clearing
    /// an already-empty bundle persists the same empty bundle and succeeds.
    pub async fn clear(&self, player: &str) -> Result<(), AliasStoreError> {
        self.persist(player, AliasBundle::empty()).await
    }
}
