use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::catalog::WardrobeItem;

/// Reference to an image: a `data:` URL, an http(s) URL or an asset path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Build a base64 data URL from raw image bytes.
    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        Self(format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_data_url(&self) -> bool {
        self.0.starts_with("data:")
    }

    pub fn is_remote(&self) -> bool {
        self.0.starts_with("https://") || self.0.starts_with("http://")
    }

    /// Split a base64 data URL into its mime type and decoded bytes.
    pub fn decode_data_url(&self) -> Result<(String, Vec<u8>), String> {
        let rest = self
            .0
            .strip_prefix("data:")
            .ok_or_else(|| "Not a data URL".to_string())?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| "Malformed data URL: missing ','".to_string())?;
        let mime_type = header
            .strip_suffix(";base64")
            .ok_or_else(|| "Data URL is not base64-encoded".to_string())?;
        if mime_type.is_empty() {
            return Err("Data URL has no mime type".to_string());
        }
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| format!("Invalid base64 in data URL: {}", e))?;
        Ok((mime_type.to_string(), bytes))
    }
}

impl From<&str> for ImageRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ImageRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Data URLs can be megabytes; show just the header.
        if self.is_data_url() {
            let head = self.0.split(',').next().unwrap_or("data:");
            write!(f, "{},<{} chars>", head, self.0.len())
        } else {
            f.write_str(&self.0)
        }
    }
}

/// One step of the outfit: the garment added at this step (none for the
/// bare model) and every pose rendered for it so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutfitLayer {
    pub garment: Option<WardrobeItem>,
    /// Rendered images keyed by pose-catalog index.
    pose_images: BTreeMap<usize, ImageRef>,
}

impl OutfitLayer {
    /// The bare model layer.
    pub fn base(image: ImageRef) -> Self {
        let mut pose_images = BTreeMap::new();
        pose_images.insert(0, image);
        Self {
            garment: None,
            pose_images,
        }
    }

    pub fn with_garment(garment: WardrobeItem, pose: usize, image: ImageRef) -> Self {
        let mut pose_images = BTreeMap::new();
        pose_images.insert(pose, image);
        Self {
            garment: Some(garment),
            pose_images,
        }
    }

    pub fn garment_id(&self) -> Option<&str> {
        self.garment.as_ref().map(|g| g.id.as_str())
    }

    pub fn image_for(&self, pose: usize) -> Option<&ImageRef> {
        self.pose_images.get(&pose)
    }

    pub fn has_pose(&self, pose: usize) -> bool {
        self.pose_images.contains_key(&pose)
    }

    /// Image to show for `pose`, falling back to the lowest cached pose index.
    pub fn display_image(&self, pose: usize) -> Option<&ImageRef> {
        self.image_for(pose).or_else(|| self.representative_image())
    }

    /// The image at the lowest cached pose index; the source image for new poses.
    pub fn representative_image(&self) -> Option<&ImageRef> {
        self.pose_images.values().next()
    }

    /// Pose indices with a cached render, ascending.
    pub fn cached_poses(&self) -> Vec<usize> {
        self.pose_images.keys().copied().collect()
    }

    pub fn pose_count(&self) -> usize {
        self.pose_images.len()
    }

    pub(crate) fn insert_pose(&mut self, pose: usize, image: ImageRef) {
        self.pose_images.insert(pose, image);
    }

    /// Drop every cached pose and keep only `pose`.
    pub(crate) fn reset_poses(&mut self, pose: usize, image: ImageRef) {
        self.pose_images.clear();
        self.pose_images.insert(pose, image);
    }
}

/// A named, persisted garment sequence. Rendered images other than the
/// thumbnail are not kept; loading re-renders them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedOutfit {
    pub id: String,
    pub name: String,
    pub thumbnail: ImageRef,
    /// Garment per layer, starting with `None` for the bare model.
    pub garments: Vec<Option<WardrobeItem>>,
    pub created_at: String,
}

impl SavedOutfit {
    /// A new snapshot with a fresh id and the current time.
    pub fn new(
        name: impl Into<String>,
        thumbnail: ImageRef,
        garments: Vec<Option<WardrobeItem>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_outfit_id(now.timestamp_millis()),
            name: name.into(),
            thumbnail,
            garments,
            created_at: now.to_rfc3339(),
        }
    }

    /// Ids of the garments in application order.
    pub fn garment_ids(&self) -> Vec<&str> {
        self.garments
            .iter()
            .flatten()
            .map(|g| g.id.as_str())
            .collect()
    }
}

/// Generate an outfit id: "outfit-" + millis + "-" + 6 hex chars.
fn generate_outfit_id(millis: i64) -> String {
    let bytes: [u8; 3] = rand::random();
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("outfit-{}-{}", millis, hex)
}

/// Why an operation did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeclineReason {
    /// Another operation is in flight.
    Busy,
    /// No model image yet.
    NoModel,
    /// Target equals the current selection.
    Unchanged,
    UnknownPose,
    UnknownBackground,
    /// Already at the bare model layer.
    AtBaseLayer,
    /// Nothing beyond the bare model to save.
    NoGarments,
}

/// Result of a session operation that did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    /// The image service produced a new image and the state was committed.
    Rendered,
    /// The state changed using already-rendered images (redo, pose cache hit,
    /// undo, reset).
    Reused,
    /// A snapshot was written to the store; session state is unchanged.
    Saved,
    Declined(DeclineReason),
}

impl Outcome {
    pub fn is_declined(&self) -> bool {
        matches!(self, Outcome::Declined(_))
    }
}

/// Snapshot of session state for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub display_image: Option<ImageRef>,
    /// Pose indices already rendered for the active layer.
    pub cached_poses: Vec<usize>,
    pub active_pose_index: usize,
    /// Pose being rendered; shown as selected while the render runs.
    pub pending_pose_index: Option<usize>,
    pub active_background_id: String,
    pub pending_background_id: Option<String>,
    pub cursor: usize,
    pub layer_count: usize,
    /// Garments of the active layers, bare model first.
    pub garments: Vec<Option<WardrobeItem>>,
    pub busy: bool,
    pub progress_message: Option<String>,
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_round_trip() {
        let image = ImageRef::from_bytes("image/png", &[1, 2, 3, 250]);
        assert!(image.is_data_url());
        assert!(image.as_str().starts_with("data:image/png;base64,"));

        let (mime, bytes) = image.decode_data_url().unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, vec![1, 2, 3, 250]);
    }

    #[test]
    fn test_decode_data_url_rejects_plain_url() {
        let image = ImageRef::new("https://example.com/a.png");
        assert!(image.is_remote());
        assert!(image.decode_data_url().is_err());
        assert!(ImageRef::new("data:image/png,raw").decode_data_url().is_err());
    }

    #[test]
    fn test_display_shortens_data_urls() {
        let image = ImageRef::from_bytes("image/jpeg", &[0u8; 64]);
        let shown = image.to_string();
        assert!(shown.starts_with("data:image/jpeg;base64,<"));
        assert!(shown.len() < image.as_str().len());
    }

    #[test]
    fn test_display_image_falls_back_to_lowest_pose() {
        let mut layer = OutfitLayer::base(ImageRef::new("p0"));
        layer.insert_pose(4, ImageRef::new("p4"));
        layer.insert_pose(2, ImageRef::new("p2"));

        assert_eq!(layer.display_image(4).unwrap().as_str(), "p4");
        assert_eq!(layer.display_image(3).unwrap().as_str(), "p0");

        layer.reset_poses(4, ImageRef::new("p4-new"));
        assert_eq!(layer.cached_poses(), vec![4]);
        assert_eq!(layer.display_image(0).unwrap().as_str(), "p4-new");
        assert_eq!(layer.representative_image().unwrap().as_str(), "p4-new");
    }

    #[test]
    fn test_saved_outfit_garment_ids_skip_base() {
        let outfit = SavedOutfit {
            id: "outfit-1".to_string(),
            name: "Weekend".to_string(),
            thumbnail: ImageRef::new("thumb"),
            garments: vec![
                None,
                Some(WardrobeItem::new("tee", "Tee", "tee.png")),
                Some(WardrobeItem::new("jacket", "Jacket", "jacket.png")),
            ],
            created_at: "2026-01-01T00:00:00Z".to_string(),
        };
        assert_eq!(outfit.garment_ids(), vec!["tee", "jacket"]);

        let json = serde_json::to_string(&outfit).unwrap();
        let back: SavedOutfit = serde_json::from_str(&json).unwrap();
        assert_eq!(back.garments[0], None);
        assert_eq!(back.thumbnail, ImageRef::new("thumb"));
    }

    #[test]
    fn test_saved_outfit_new_generates_ids() {
        let a = SavedOutfit::new("A", ImageRef::new("t"), vec![None]);
        let b = SavedOutfit::new("B", ImageRef::new("t"), vec![None]);
        assert!(a.id.starts_with("outfit-"));
        assert_eq!(a.id.rsplit('-').next().unwrap().len(), 6);
        assert_ne!(a.id, b.id);
        assert!(chrono::DateTime::parse_from_rfc3339(&a.created_at).is_ok());
    }
}
