//! Image synthesis: the generative-image service the session renders through.
//!
//! `ImageSynthesizer` is the narrow contract the outfit session depends on;
//! `GeminiSynthesizer` implements it over the Gemini REST API.

pub mod gemini;
pub mod image_prep;
pub mod prompts;

use async_trait::async_trait;

use crate::error::TryOnError;
use crate::outfit::ImageRef;

pub use gemini::GeminiSynthesizer;
pub use image_prep::prepare_upload;

/// Renders new images of the model. Every call is slow and fallible; the
/// caller applies timeouts and never retries.
#[async_trait]
pub trait ImageSynthesizer: Send + Sync {
    /// Dress the person in `base` with the garment shown in `garment`.
    async fn render_with_garment(
        &self,
        base: &ImageRef,
        garment: &ImageRef,
        background_prompt: &str,
    ) -> Result<ImageRef, TryOnError>;

    /// Re-render `base` in a different pose, keeping outfit and person.
    async fn render_pose_variation(
        &self,
        base: &ImageRef,
        pose_instruction: &str,
        background_prompt: &str,
    ) -> Result<ImageRef, TryOnError>;

    /// Replace the scene behind the person in `base`.
    async fn render_background(
        &self,
        base: &ImageRef,
        background_prompt: &str,
    ) -> Result<ImageRef, TryOnError>;

    /// Turn an uploaded photo into a clean full-body model image.
    async fn render_model(&self, photo: &ImageRef) -> Result<ImageRef, TryOnError>;
}
