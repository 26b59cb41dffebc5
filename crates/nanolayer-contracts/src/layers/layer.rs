use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::prompts::{SPLIT_BACKGROUND_INSTRUCTION, SPLIT_SUBJECT_INSTRUCTION};

pub const PNG_MIME_TYPE: &str = "image/png";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LayerType {
    Original,
    Subject,
    Background,
}

impl LayerType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Subject => "subject",
            Self::Background => "background",
        }
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The two halves a split produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SplitRole {
    Subject,
    Background,
}

impl SplitRole {
    pub fn layer_type(self) -> LayerType {
        match self {
            Self::Subject => LayerType::Subject,
            Self::Background => LayerType::Background,
        }
    }

    /// Static instruction sent alongside the source image.
    pub fn instruction(self) -> &'static str {
        match self {
            Self::Subject => SPLIT_SUBJECT_INSTRUCTION,
            Self::Background => SPLIT_BACKGROUND_INSTRUCTION,
        }
    }

    pub fn prompt_label(self) -> &'static str {
        match self {
            Self::Subject => "Split Subject",
            Self::Background => "Split Background",
        }
    }
}

impl fmt::Display for SplitRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.layer_type().as_str())
    }
}

/// Decoded image payload. Cloning shares the bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    mime_type: String,
    bytes: Arc<[u8]>,
}

impl ImageData {
    pub fn new(mime_type: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn png(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::new(PNG_MIME_TYPE, bytes)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }
}

impl fmt::Debug for ImageData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageData")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub id: String,
    pub layer_type: LayerType,
    pub image: ImageData,
    pub prompt_used: String,
    pub created_at: DateTime<Utc>,
    pub parent_id: Option<String>,
}

impl Layer {
    pub fn original(image: ImageData, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            layer_type: LayerType::Original,
            image,
            prompt_used: prompt.into(),
            created_at: Utc::now(),
            parent_id: None,
        }
    }

    pub fn derived(role: SplitRole, image: ImageData, parent_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            layer_type: role.layer_type(),
            image,
            prompt_used: role.prompt_label().to_string(),
            created_at: Utc::now(),
            parent_id: Some(parent_id.into()),
        }
    }

    pub fn is_original(&self) -> bool {
        self.layer_type == LayerType::Original
    }

    /// First four characters of the id, used for "Asset #xxxx" labels.
    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(4)
            .map(|(idx, _)| idx)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }

    /// Event-log view of the layer; the image itself is reduced to a digest.
    pub fn summary(&self) -> Map<String, Value> {
        let mut out = Map::new();
        out.insert("layer_id".to_string(), json!(self.id));
        out.insert("layer_type".to_string(), json!(self.layer_type));
        out.insert("parent_id".to_string(), json!(self.parent_id));
        out.insert("prompt_used".to_string(), json!(self.prompt_used));
        out.insert(
            "created_at".to_string(),
            json!(self.created_at.to_rfc3339()),
        );
        out.insert("mime_type".to_string(), json!(self.image.mime_type()));
        out.insert("bytes".to_string(), json!(self.image.byte_len()));
        out.insert("sha256".to_string(), json!(self.image.sha256_hex()));
        out
    }
}
