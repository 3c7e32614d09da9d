pub mod catalog;
pub mod config;
pub mod error;
pub mod outfit;
pub mod storage;
pub mod synthesis;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

pub use catalog::{Background, Catalog, PoseCatalog, Wardrobe, WardrobeItem};
pub use config::TryOnConfig;
pub use error::TryOnError;
pub use outfit::{
    DeclineReason, ImageRef, OutfitHistory, OutfitLayer, OutfitSession, Outcome, SavedOutfit,
    SessionView,
};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};
pub use synthesis::{GeminiSynthesizer, ImageSynthesizer};

/// Install the fmt subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Build a session from config: Gemini for rendering, SQLite for saved
/// outfits, and the configured or built-in catalog.
pub fn open_session(config: &TryOnConfig) -> Result<OutfitSession> {
    let catalog = match &config.catalog_path {
        Some(path) => catalog::load_catalog(path)?,
        None => catalog::default_catalog(),
    };

    let api_key = config::resolve_api_key()?;
    let synthesizer = GeminiSynthesizer::new(
        api_key,
        config.model.clone(),
        &config.api_base,
        config.render_timeout(),
    )?
    .with_asset_dir(config.asset_dir()?);

    let db_path = config.database_path()?;
    let store = SqliteStore::open(&db_path)?;

    info!(
        "Opened session: model '{}', outfits at {:?}",
        config.model, db_path
    );

    Ok(
        OutfitSession::new(Arc::new(synthesizer), Arc::new(store), catalog)
            .with_render_timeout(config.render_timeout())
            .with_max_upload_dimension(config.max_upload_dimension),
    )
}
