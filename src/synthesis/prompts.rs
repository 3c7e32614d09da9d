//! Prompts for the try-on image calls.

/// Prompt for generating the model image from an uploaded photo.
pub fn build_model_prompt() -> String {
    r#"You are an expert fashion photographer AI. Transform the person in this image into a full-body fashion model photo suitable for an e-commerce website.

Rules:
- The background must be a clean, neutral studio backdrop (light gray, #f0f0f0).
- The person should have a neutral, professional model expression.
- Preserve the person's identity, unique features, and body type, but place them in a standard, relaxed standing model pose.
- The final image must be photorealistic.
- Return ONLY the final image."#
        .to_string()
}

/// Prompt for dressing the model (first image) in the garment (second image).
pub fn build_garment_prompt(background_prompt: &str) -> String {
    format!(
        r#"You are an expert virtual try-on AI. You will be given a 'model image' and a 'garment image'. Your task is to create a new photorealistic image where the person from the 'model image' is wearing the clothing from the 'garment image'.

Rules:
1. Complete garment replacement: remove and replace the clothing item worn by the person in the 'model image' with the new garment. No part of the original clothing that the new garment covers may remain visible.
2. Preserve the model: the person's face, hair, body shape, and pose must remain unchanged.
3. Background: the scene must be {background}.
4. Apply the garment realistically, adapting to the pose with natural folds, shadows, and lighting consistent with the scene.
5. Output: return ONLY the final, edited image. Do not include any text."#,
        background = background_prompt
    )
}

/// Prompt for re-rendering the same outfit in a different pose.
pub fn build_pose_prompt(pose_instruction: &str, background_prompt: &str) -> String {
    format!(
        r#"You are an expert fashion photographer AI. Take this image and regenerate it from a different perspective. The person, clothing, and overall style must remain identical.

New perspective: "{pose}"
Scene: {background}

Return ONLY the final image."#,
        pose = pose_instruction,
        background = background_prompt
    )
}

/// Prompt for moving the model into a new scene.
pub fn build_background_prompt(background_prompt: &str) -> String {
    format!(
        r#"You are an expert photo editor AI. Replace the background of this image with {background}.

Rules:
- The person, their pose, face, hair, and clothing must remain exactly the same.
- Match lighting, shadows, and color temperature on the person to the new scene so the result looks like a single photograph.
- Return ONLY the final image."#,
        background = background_prompt
    )
}
