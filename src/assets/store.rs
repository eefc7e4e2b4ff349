/// Disk-backed store for converted binary assets with a bounded lifetime
///
/// Every asset is written as `{uuid}.{ext}` plus a `{uuid}.{ext}.meta.json`
/// sidecar holding its mime type, creation time and TTL, so the index can be
/// rebuilt after a restart and nothing is orphaned. The in-memory index is the
/// source of truth for expiry; files of indexed assets are removed only by
/// the reaper.

use crate::assets::mime;
use crate::error::NodeError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Hard ceiling on asset lifetime: 5 days
pub const MAX_TTL_SECONDS: u64 = 432_000;

const META_SUFFIX: &str = ".meta.json";

/// Metadata of one stored asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringAsset {
    /// File name under the assets directory
    pub name: String,
    /// Public path, e.g. `/assets/3f2a....png`
    pub path: String,
    pub mime_type: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl ExpiringAsset {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + ChronoDuration::seconds(self.ttl_seconds as i64)
    }

    /// Expired strictly after `created_at + ttl`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }
}

/// A freshly stored asset together with its public URL
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAsset {
    #[serde(flatten)]
    pub asset: ExpiringAsset,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Expiring asset store
#[derive(Debug)]
pub struct ExpiringAssetStore {
    dir: PathBuf,
    public_base_url: String,
    index: Mutex<HashMap<String, ExpiringAsset>>,
}

/// Clamp a requested TTL to the store's ceiling
pub fn clamp_ttl(ttl_seconds: u64) -> u64 {
    ttl_seconds.min(MAX_TTL_SECONDS)
}

impl ExpiringAssetStore {
    /// Open the store, creating the directory and reloading sidecars
    pub async fn open(dir: impl Into<PathBuf>, public_base_url: impl Into<String>) -> anyhow::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create assets directory '{}': {}", dir.display(), e))?;

        let mut index = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.ends_with(META_SUFFIX) {
                continue;
            }
            let raw = tokio::fs::read(entry.path()).await?;
            match serde_json::from_slice::<ExpiringAsset>(&raw) {
                Ok(asset) => {
                    index.insert(asset.name.clone(), asset);
                }
                Err(e) => tracing::warn!("⚠️ Ignoring unreadable asset sidecar {}: {}", file_name, e),
            }
        }

        tracing::info!("🗂️ Asset store ready at {} ({} assets restored)", dir.display(), index.len());

        Ok(Self {
            dir,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            index: Mutex::new(index),
        })
    }

    /// Persist bytes and return the public location
    ///
    /// TTLs above five days are clamped, never rejected.
    pub async fn store(&self, bytes: &[u8], mime_type: &str, ttl_seconds: u64) -> Result<StoredAsset, NodeError> {
        self.store_at(bytes, mime_type, ttl_seconds, Utc::now()).await
    }

    /// `store` with an explicit creation time
    pub async fn store_at(
        &self,
        bytes: &[u8],
        mime_type: &str,
        ttl_seconds: u64,
        created_at: DateTime<Utc>,
    ) -> Result<StoredAsset, NodeError> {
        let ttl_seconds = clamp_ttl(ttl_seconds);
        let name = format!("{}.{}", uuid::Uuid::new_v4(), mime::extension_for(mime_type));
        let asset = ExpiringAsset {
            path: format!("/assets/{}", name),
            name: name.clone(),
            mime_type: mime_type.to_string(),
            size: bytes.len() as u64,
            created_at,
            ttl_seconds,
        };

        self.persist(&asset, bytes).await?;
        self.lock_index().insert(name.clone(), asset.clone());

        tracing::info!("📦 Stored asset {} ({} bytes, {}, ttl {}s)", name, asset.size, asset.mime_type, ttl_seconds);

        Ok(StoredAsset {
            url: format!("{}{}", self.public_base_url, asset.path),
            expires_at: asset.expires_at(),
            asset,
        })
    }

    /// Write the sidecar, then the data file
    ///
    /// A sidecar without data is still indexed on reopen and reaped on expiry;
    /// if the data write fails the sidecar is removed again.
    async fn persist(&self, asset: &ExpiringAsset, bytes: &[u8]) -> Result<(), NodeError> {
        let data_path = self.dir.join(&asset.name);
        let meta_path = self.dir.join(format!("{}{}", asset.name, META_SUFFIX));
        let meta = serde_json::to_vec(asset).map_err(|e| NodeError::failed(format!("Failed to encode asset metadata: {}", e)))?;

        tokio::fs::write(&meta_path, meta)
            .await
            .map_err(|e| NodeError::failed(format!("Failed to write asset metadata {}: {}", asset.name, e)))?;

        if let Err(e) = tokio::fs::write(&data_path, bytes).await {
            if let Err(cleanup) = tokio::fs::remove_file(&meta_path).await {
                tracing::warn!("⚠️ Failed to remove sidecar of unwritten asset {}: {}", asset.name, cleanup);
            }
            return Err(NodeError::failed(format!("Failed to write asset {}: {}", asset.name, e)));
        }
        Ok(())
    }

    /// Metadata for a live asset
    pub fn get(&self, name: &str) -> Option<ExpiringAsset> {
        self.lock_index().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read an asset's bytes if it has not expired
    pub async fn read(&self, name: &str) -> Option<(ExpiringAsset, Vec<u8>)> {
        let asset = self.get(name)?;
        if asset.is_expired_at(Utc::now()) {
            return None;
        }
        match tokio::fs::read(self.dir.join(&asset.name)).await {
            Ok(bytes) => Some((asset, bytes)),
            Err(e) => {
                tracing::warn!("⚠️ Asset {} is indexed but unreadable: {}", name, e);
                None
            }
        }
    }

    /// Delete every asset past its expiry
    pub async fn reap_expired(&self) -> usize {
        self.reap_expired_at(Utc::now()).await
    }

    /// Delete every asset expired as of `now`
    ///
    /// Idempotent; missing files are ignored. Returns the number of assets reaped.
    pub async fn reap_expired_at(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<ExpiringAsset> = {
            let mut index = self.lock_index();
            let names: Vec<String> = index
                .values()
                .filter(|asset| asset.is_expired_at(now))
                .map(|asset| asset.name.clone())
                .collect();
            names.iter().filter_map(|name| index.remove(name)).collect()
        };

        for asset in &expired {
            for path in [
                self.dir.join(&asset.name),
                self.dir.join(format!("{}{}", asset.name, META_SUFFIX)),
            ] {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!("⚠️ Failed to delete expired asset file {}: {}", path.display(), e);
                    }
                }
            }
        }

        if !expired.is_empty() {
            tracing::info!("🧹 Reaped {} expired assets", expired.len());
        }
        expired.len()
    }

    fn lock_index(&self) -> std::sync::MutexGuard<'_, HashMap<String, ExpiringAsset>> {
        self.index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
