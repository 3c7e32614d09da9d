//! Outfit state: layered history, per-layer pose cache and the session that
//! drives them.

pub mod history;
pub mod session;
pub mod types;

pub use history::OutfitHistory;
pub use session::{OutfitSession, DEFAULT_RENDER_TIMEOUT};
pub use types::*;
