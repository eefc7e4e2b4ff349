/// Expiring asset storage
///
/// Converted binary payloads are written here and exposed under `/assets/{name}`
/// until their TTL runs out. A background reaper (see `runtime::scheduler`)
/// deletes them afterwards.

// Disk-backed store with in-memory expiry index
pub mod store;

// Mime type <-> file extension helpers
pub mod mime;

pub use store::{clamp_ttl, ExpiringAsset, ExpiringAssetStore, StoredAsset, MAX_TTL_SECONDS};
