mod layer;
mod store;

pub use layer::{ImageData, Layer, LayerType, SplitRole, PNG_MIME_TYPE};
pub use store::{AssetStore, LayerSet};
