use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nanolayer_contracts::layers::ImageData;
use serde_json::Value;

use crate::error::GenerationError;

/// Pulls the image out of a `generateContent` response.
///
/// Only the first candidate is considered. Its parts are scanned in order
/// and the first one carrying non-empty inline data wins; later image parts
/// are ignored. Both `inlineData` and `inline_data` spellings are accepted.
/// The returned image is tagged `image/png`, the gateway's output format.
pub fn extract_first_inline_image(payload: &Value) -> Result<ImageData, GenerationError> {
    let parts = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let data = parts
        .iter()
        .filter_map(|part| part.get("inlineData").or_else(|| part.get("inline_data")))
        .filter_map(|inline| inline.get("data").and_then(Value::as_str))
        .find(|data| !data.is_empty())
        .ok_or(GenerationError::NoImageInResponse)?;

    let bytes = BASE64.decode(data.as_bytes()).map_err(|err| {
        GenerationError::upstream(format!("image payload is not valid base64: {err}"))
    })?;
    Ok(ImageData::png(bytes))
}
