//! TOML catalog loading.
//!
//! - `default_catalog()` - the catalog embedded in the binary
//! - `load_catalog(path)` - a custom catalog from disk

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

use super::types::Catalog;

/// Default catalog compiled into the binary from `config/catalog.toml`.
const DEFAULT_CATALOG: &str = include_str!("../../config/catalog.toml");

/// Load and validate a catalog from a TOML file.
pub fn load_catalog(path: &Path) -> Result<Catalog> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog {:?}", path))?;
    let catalog: Catalog =
        toml::from_str(&content).with_context(|| format!("Invalid catalog {:?}", path))?;
    validate_catalog(&catalog)?;
    info!(
        "Loaded catalog from {:?}: {} garments, {} backgrounds, {} poses",
        path,
        catalog.wardrobe.len(),
        catalog.backgrounds.len(),
        catalog.poses.len()
    );
    Ok(catalog)
}

/// The built-in catalog.
///
/// # Panics
/// Panics if the embedded TOML is invalid (a build-time bug).
pub fn default_catalog() -> Catalog {
    let catalog: Catalog =
        toml::from_str(DEFAULT_CATALOG).expect("embedded catalog.toml must be valid TOML");
    debug_assert!(validate_catalog(&catalog).is_ok());
    catalog
}

/// A usable catalog has at least one pose, at least one background and
/// unique background ids.
pub fn validate_catalog(catalog: &Catalog) -> Result<()> {
    if catalog.poses.is_empty() {
        bail!("Catalog must define at least one pose");
    }
    if catalog.backgrounds.is_empty() {
        bail!("Catalog must define at least one background");
    }
    let mut seen = HashSet::new();
    for bg in &catalog.backgrounds {
        if !seen.insert(bg.id.as_str()) {
            bail!("Duplicate background id '{}'", bg.id);
        }
    }
    Ok(())
}
