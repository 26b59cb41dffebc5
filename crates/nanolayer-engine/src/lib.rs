//! Generation engine: the Gemini gateway and the studio orchestrator that
//! drives it.

mod error;
mod extract;
mod gateway;
mod studio;

pub use error::GenerationError;
pub use extract::extract_first_inline_image;
pub use gateway::{GatewayConfig, GeminiGateway, ImageGateway, DEFAULT_API_BASE};
pub use studio::{RequestOutcome, Studio};
