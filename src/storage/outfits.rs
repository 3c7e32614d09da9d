//! Saved-outfit collection persisted under one fixed key as a JSON array.

use std::sync::Arc;

use tracing::info;

use super::KeyValueStore;
use crate::error::TryOnError;
use crate::outfit::SavedOutfit;

/// Store key holding the serialized `Vec<SavedOutfit>`.
pub const SAVED_OUTFITS_KEY: &str = "fitcheck.saved_outfits";

/// Read-modify-write access to the saved outfits. No concurrent writers are
/// expected besides this process.
#[derive(Clone)]
pub struct SavedOutfitStore {
    store: Arc<dyn KeyValueStore>,
}

impl SavedOutfitStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// All saved outfits in save order. A missing key is an empty collection.
    pub fn list(&self) -> Result<Vec<SavedOutfit>, TryOnError> {
        match self.store.load(SAVED_OUTFITS_KEY)? {
            None => Ok(Vec::new()),
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                TryOnError::Storage(format!("Failed to deserialize saved outfits: {}", e))
            }),
        }
    }

    /// Insert an outfit, replacing any existing entry with the same id.
    pub fn save(&self, outfit: &SavedOutfit) -> Result<(), TryOnError> {
        let mut outfits = self.list()?;
        match outfits.iter_mut().find(|o| o.id == outfit.id) {
            Some(existing) => *existing = outfit.clone(),
            None => outfits.push(outfit.clone()),
        }
        self.write(&outfits)?;
        info!("Saved outfit '{}' ({})", outfit.name, outfit.id);
        Ok(())
    }

    /// Remove the outfit with `id`. Returns false if there was none.
    pub fn delete(&self, id: &str) -> Result<bool, TryOnError> {
        let mut outfits = self.list()?;
        let before = outfits.len();
        outfits.retain(|o| o.id != id);
        if outfits.len() == before {
            return Ok(false);
        }
        self.write(&outfits)?;
        info!("Deleted saved outfit {}", id);
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Result<Option<SavedOutfit>, TryOnError> {
        Ok(self.list()?.into_iter().find(|o| o.id == id))
    }

    fn write(&self, outfits: &[SavedOutfit]) -> Result<(), TryOnError> {
        let bytes = serde_json::to_vec(outfits).map_err(|e| {
            TryOnError::Storage(format!("Failed to serialize saved outfits: {}", e))
        })?;
        self.store.save(SAVED_OUTFITS_KEY, &bytes)
    }
}
