//! Persistence: a byte-oriented key-value store and the saved-outfit
//! collection kept in it.

pub mod memory;
pub mod outfits;
pub mod sqlite;

use crate::error::TryOnError;

pub use memory::MemoryStore;
pub use outfits::{SavedOutfitStore, SAVED_OUTFITS_KEY};
pub use sqlite::SqliteStore;

/// Key-value byte storage that survives restarts.
///
/// Implementations are synchronous; values are small (a JSON document of
/// saved outfits).
pub trait KeyValueStore: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, TryOnError>;
    fn save(&self, key: &str, value: &[u8]) -> Result<(), TryOnError>;
    fn remove(&self, key: &str) -> Result<(), TryOnError>;
}
