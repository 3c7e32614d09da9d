//! Gemini image-generation client implementing `ImageSynthesizer`.
//!
//! Every call is one `generateContent` request carrying the input images as
//! inline base64 parts followed by a text prompt. The first image part of the
//! first candidate is the result.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{error, info};
use url::Url;

use super::prompts::{
    build_background_prompt, build_garment_prompt, build_model_prompt, build_pose_prompt,
};
use super::ImageSynthesizer;
use crate::error::TryOnError;
use crate::outfit::ImageRef;

/// Default Generative Language API base.
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default image-capable model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";

pub struct GeminiSynthesizer {
    client: reqwest::Client,
    api_key: String,
    model: String,
    api_base: Url,
    /// Directory relative image paths (catalog assets) are read from.
    asset_dir: Option<PathBuf>,
}

impl GeminiSynthesizer {
    /// Build a client. `request_timeout` bounds each HTTP request.
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        api_base: &str,
        request_timeout: Duration,
    ) -> Result<Self, TryOnError> {
        let api_base = Url::parse(api_base)
            .map_err(|e| TryOnError::Config(format!("Invalid API base URL '{}': {}", api_base, e)))?;
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TryOnError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            api_base,
            asset_dir: None,
        })
    }

    pub fn with_asset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.asset_dir = Some(dir.into());
        self
    }

    fn generate_url(&self) -> Result<Url, TryOnError> {
        let raw = format!(
            "{}/models/{}:generateContent",
            self.api_base.as_str().trim_end_matches('/'),
            self.model
        );
        Url::parse(&raw).map_err(|e| TryOnError::Config(format!("Invalid endpoint '{}': {}", raw, e)))
    }

    /// Resolve an image reference to an inline request part.
    async fn inline_part(&self, image: &ImageRef) -> Result<serde_json::Value, TryOnError> {
        let (mime_type, bytes) = if image.is_data_url() {
            image.decode_data_url().map_err(TryOnError::Image)?
        } else if image.is_remote() {
            self.fetch_remote(image.as_str()).await?
        } else {
            read_asset(self.asset_dir.as_deref(), image.as_str())?
        };

        Ok(serde_json::json!({
            "inlineData": {
                "mimeType": mime_type,
                "data": STANDARD.encode(&bytes)
            }
        }))
    }

    async fn fetch_remote(&self, url: &str) -> Result<(String, Vec<u8>), TryOnError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TryOnError::Image(format!("Failed to fetch image '{}': {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TryOnError::Image(format!(
                "Failed to fetch image '{}': HTTP {}",
                url, status
            )));
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(';').next().unwrap_or(s).trim().to_string())
            .filter(|s| s.starts_with("image/"))
            .unwrap_or_else(|| "image/png".to_string());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TryOnError::Image(format!("Failed to read image '{}': {}", url, e)))?;

        Ok((mime_type, bytes.to_vec()))
    }

    /// Send the images and prompt, return the generated image.
    async fn generate(
        &self,
        images: &[&ImageRef],
        prompt: String,
        operation: &str,
    ) -> Result<ImageRef, TryOnError> {
        let mut parts = Vec::with_capacity(images.len() + 1);
        for image in images {
            parts.push(self.inline_part(image).await?);
        }
        parts.push(serde_json::json!({ "text": prompt }));

        let body = serde_json::json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "responseModalities": ["IMAGE", "TEXT"]
            }
        });

        info!("Requesting {} from model '{}'", operation, self.model);

        let response = self
            .client
            .post(self.generate_url()?)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let msg = if e.is_timeout() {
                    format!("Image API timeout during {}", operation)
                } else {
                    format!("Image API request failed during {}: {}", operation, e)
                };
                error!("{}", msg);
                TryOnError::Synthesis(msg)
            })?;

        let body_text = handle_api_response(response).await?;
        let resp_json: serde_json::Value = serde_json::from_str(&body_text).map_err(|e| {
            let msg = format!("Failed to parse image API response: {}", e);
            error!("{}", msg);
            TryOnError::Synthesis(msg)
        })?;

        let image = parse_generate_response(&resp_json)?;
        info!("{} returned {}", operation, image);
        Ok(image)
    }
}

#[async_trait]
impl ImageSynthesizer for GeminiSynthesizer {
    async fn render_with_garment(
        &self,
        base: &ImageRef,
        garment: &ImageRef,
        background_prompt: &str,
    ) -> Result<ImageRef, TryOnError> {
        self.generate(
            &[base, garment],
            build_garment_prompt(background_prompt),
            "garment try-on",
        )
        .await
    }

    async fn render_pose_variation(
        &self,
        base: &ImageRef,
        pose_instruction: &str,
        background_prompt: &str,
    ) -> Result<ImageRef, TryOnError> {
        self.generate(
            &[base],
            build_pose_prompt(pose_instruction, background_prompt),
            "pose variation",
        )
        .await
    }

    async fn render_background(
        &self,
        base: &ImageRef,
        background_prompt: &str,
    ) -> Result<ImageRef, TryOnError> {
        self.generate(
            &[base],
            build_background_prompt(background_prompt),
            "background change",
        )
        .await
    }

    async fn render_model(&self, photo: &ImageRef) -> Result<ImageRef, TryOnError> {
        self.generate(&[photo], build_model_prompt(), "model generation")
            .await
    }
}

/// Check status and return the body text, truncating error bodies.
async fn handle_api_response(response: reqwest::Response) -> Result<String, TryOnError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read body>".to_string());
        let msg = format!("Image API error: {} - {}", status, truncate(&body, 1024));
        error!("{}", msg);
        return Err(TryOnError::Synthesis(msg));
    }
    response
        .text()
        .await
        .map_err(|e| TryOnError::Synthesis(format!("Failed to read image API response body: {}", e)))
}

/// Extract the generated image from a `generateContent` response.
///
/// Blocked prompts, non-`STOP` finishes and text-only answers are failures.
pub(crate) fn parse_generate_response(json: &serde_json::Value) -> Result<ImageRef, TryOnError> {
    if let Some(reason) = json["promptFeedback"]["blockReason"].as_str() {
        let detail = json["promptFeedback"]["blockReasonMessage"]
            .as_str()
            .unwrap_or("");
        let msg = format!("Request was blocked. Reason: {}. {}", reason, detail);
        return Err(TryOnError::Synthesis(msg.trim_end().to_string()));
    }

    let candidate = &json["candidates"][0];
    let parts = candidate["content"]["parts"].as_array();

    for part in parts.into_iter().flatten() {
        if let Some(data) = part["inlineData"]["data"].as_str() {
            let mime_type = part["inlineData"]["mimeType"]
                .as_str()
                .unwrap_or("image/png");
            return Ok(ImageRef::new(format!("data:{};base64,{}", mime_type, data)));
        }
    }

    if let Some(reason) = candidate["finishReason"].as_str() {
        if reason != "STOP" {
            return Err(TryOnError::Synthesis(format!(
                "Image generation stopped unexpectedly. Reason: {}. This often relates to safety settings.",
                reason
            )));
        }
    }

    let text: String = parts
        .into_iter()
        .flatten()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let text = text.trim();

    let msg = if text.is_empty() {
        "The AI model did not return an image. This can happen due to safety filters or if the request is too complex. Please try a different image.".to_string()
    } else {
        format!(
            "The AI model did not return an image. The model responded with text: \"{}\"",
            truncate(text, 500)
        )
    };
    Err(TryOnError::Synthesis(msg))
}

/// Read a catalog asset from disk. Relative paths resolve against `asset_dir`.
fn read_asset(asset_dir: Option<&Path>, path: &str) -> Result<(String, Vec<u8>), TryOnError> {
    let path = Path::new(path);
    let full = match asset_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    };
    let bytes = std::fs::read(&full)
        .map_err(|e| TryOnError::Image(format!("Failed to read image {:?}: {}", full, e)))?;
    let mime_type = image::ImageFormat::from_path(&full)
        .map(|f| f.to_mime_type().to_string())
        .unwrap_or_else(|_| "image/png".to_string());
    Ok((mime_type, bytes))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}
