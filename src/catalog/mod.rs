//! Static catalogs: wardrobe, backgrounds and poses.

pub mod defaults;
pub mod types;

pub use defaults::{default_catalog, load_catalog, validate_catalog};
pub use types::*;
