//! Layered outfit history with a cursor.
//!
//! Invariants upheld by every method:
//! - there is always at least one layer and `cursor < layers.len()`
//! - layer 0 is the bare model (`garment == None`)
//!
//! Pushing a layer discards everything beyond the cursor. Moving the cursor
//! back does not, so a removed garment can be re-applied without rendering.

use serde::Serialize;

use super::types::{ImageRef, OutfitLayer};
use crate::catalog::WardrobeItem;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutfitHistory {
    layers: Vec<OutfitLayer>,
    cursor: usize,
}

impl OutfitHistory {
    /// A history holding only the bare model rendered at pose 0.
    pub fn new(base_image: ImageRef) -> Self {
        Self {
            layers: vec![OutfitLayer::base(base_image)],
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Never true; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn layers(&self) -> &[OutfitLayer] {
        &self.layers
    }

    pub fn active_layer(&self) -> &OutfitLayer {
        &self.layers[self.cursor]
    }

    pub fn layer(&self, index: usize) -> Option<&OutfitLayer> {
        self.layers.get(index)
    }

    pub(crate) fn layer_mut(&mut self, index: usize) -> Option<&mut OutfitLayer> {
        self.layers.get_mut(index)
    }

    /// The layer just beyond the cursor, kept around after an undo.
    pub fn next_layer(&self) -> Option<&OutfitLayer> {
        self.layers.get(self.cursor + 1)
    }

    /// True when applying `garment_id` can reuse the layer ahead of the cursor.
    pub fn can_redo(&self, garment_id: &str) -> bool {
        self.next_layer()
            .and_then(|layer| layer.garment_id())
            .is_some_and(|id| id == garment_id)
    }

    /// Move the cursor onto the layer ahead of it. Returns false at the end.
    pub fn redo(&mut self) -> bool {
        if self.cursor + 1 < self.layers.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    /// Step back one layer without discarding anything. Returns false at the base.
    pub fn undo(&mut self) -> bool {
        if self.cursor > 0 {
            self.cursor -= 1;
            true
        } else {
            false
        }
    }

    /// Drop every layer beyond the cursor, append a garment layer rendered at
    /// `pose`, and move the cursor onto it.
    pub fn push(&mut self, garment: WardrobeItem, pose: usize, image: ImageRef) {
        self.layers.truncate(self.cursor + 1);
        self.layers
            .push(OutfitLayer::with_garment(garment, pose, image));
        self.cursor = self.layers.len() - 1;
    }

    /// Garments of layers `0..=cursor`, bare model first.
    pub fn active_garments(&self) -> Vec<Option<WardrobeItem>> {
        self.layers[..=self.cursor]
            .iter()
            .map(|l| l.garment.clone())
            .collect()
    }

    /// Ids of every garment currently worn, in application order.
    pub fn worn_garment_ids(&self) -> Vec<&str> {
        self.layers[..=self.cursor]
            .iter()
            .filter_map(|l| l.garment_id())
            .collect()
    }

    pub fn display_image(&self, pose: usize) -> Option<&ImageRef> {
        self.active_layer().display_image(pose)
    }
}
