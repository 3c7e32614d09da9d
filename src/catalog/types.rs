use serde::{Deserialize, Serialize};

/// A selectable garment. Identity is the `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WardrobeItem {
    pub id: String,
    pub name: String,
    /// Path, http(s) URL or data URL of the garment image.
    pub image_url: String,
}

impl WardrobeItem {
    pub fn new(id: impl Into<String>, name: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image_url: image_url.into(),
        }
    }
}

/// A rendering context the model can be placed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Background {
    pub id: String,
    pub name: String,
    pub thumbnail_url: String,
    /// Scene description handed to the image model.
    pub prompt: String,
}

/// Fixed, ordered list of pose instructions. A pose is identified by its index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoseCatalog {
    poses: Vec<String>,
}

impl PoseCatalog {
    pub fn new(poses: Vec<String>) -> Self {
        Self { poses }
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.poses.len()
    }

    /// Instruction text for a pose index.
    pub fn instruction(&self, index: usize) -> Option<&str> {
        self.poses.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.poses.iter().map(String::as_str)
    }
}

/// Garments known to the session, in first-seen order.
///
/// Append-only: registering an id that is already present is a no-op.
/// Deserializing goes through `register` too, so later duplicates are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<WardrobeItem>", into = "Vec<WardrobeItem>")]
pub struct Wardrobe {
    items: Vec<WardrobeItem>,
}

impl From<Vec<WardrobeItem>> for Wardrobe {
    fn from(items: Vec<WardrobeItem>) -> Self {
        Self::new(items)
    }
}

impl From<Wardrobe> for Vec<WardrobeItem> {
    fn from(wardrobe: Wardrobe) -> Self {
        wardrobe.items
    }
}

impl Wardrobe {
    pub fn new(items: Vec<WardrobeItem>) -> Self {
        let mut wardrobe = Self::default();
        for item in items {
            wardrobe.register(item);
        }
        wardrobe
    }

    /// Add a garment if its id is unseen. Returns true when it was added.
    pub fn register(&mut self, item: WardrobeItem) -> bool {
        if self.contains(&item.id) {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|i| i.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&WardrobeItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn items(&self) -> &[WardrobeItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Everything the session selects from: garments, backgrounds and poses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub wardrobe: Wardrobe,
    pub backgrounds: Vec<Background>,
    pub poses: PoseCatalog,
}

impl Catalog {
    pub fn background(&self, id: &str) -> Option<&Background> {
        self.backgrounds.iter().find(|b| b.id == id)
    }

    /// The first background is the default rendering context.
    pub fn default_background(&self) -> Option<&Background> {
        self.backgrounds.first()
    }
}
