use std::env;
use std::time::Duration;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use nanolayer_contracts::layers::{ImageData, SplitRole};
use nanolayer_contracts::prompts::DEFAULT_IMAGE_MODEL;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use crate::error::GenerationError;
use crate::extract::extract_first_inline_image;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Adapter boundary to the image model. Each call is one round trip with no
/// retry and no caching.
pub trait ImageGateway: Send + Sync {
    fn generate_base(&self, prompt: &str) -> Result<ImageData, GenerationError>;

    /// Failures are reported as [`GenerationError::SplitFailed`] for `role`.
    fn generate_layer(
        &self,
        source: &ImageData,
        role: SplitRole,
    ) -> Result<ImageData, GenerationError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl GatewayConfig {
    /// Reads `GEMINI_API_BASE`, `NANOLAYER_IMAGE_MODEL` and the first of
    /// `GEMINI_API_KEY`, `GOOGLE_API_KEY`, `API_KEY` that is set.
    pub fn from_env() -> Self {
        Self {
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_key: non_empty_env("GEMINI_API_KEY")
                .or_else(|| non_empty_env("GOOGLE_API_KEY"))
                .or_else(|| non_empty_env("API_KEY")),
            model: non_empty_env("NANOLAYER_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.trim().is_empty() {
            self.model = model.trim().to_string();
        }
        self
    }

    pub fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!(
            "{}/{}:generateContent",
            self.api_base.trim_end_matches('/'),
            model_path
        )
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            model: DEFAULT_IMAGE_MODEL.to_string(),
        }
    }
}

pub struct GeminiGateway {
    config: GatewayConfig,
    http: HttpClient,
}

impl GeminiGateway {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        // Latency is left to the service; no client-side deadline.
        let http = HttpClient::builder()
            .timeout(None::<Duration>)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn base_parts(prompt: &str) -> Vec<Value> {
        vec![json!({ "text": prompt })]
    }

    fn layer_parts(source: &ImageData, role: SplitRole) -> Vec<Value> {
        vec![
            json!({ "text": role.instruction() }),
            json!({
                "inlineData": {
                    "mimeType": source.mime_type(),
                    "data": BASE64.encode(source.bytes()),
                }
            }),
        ]
    }

    fn request_payload(parts: Vec<Value>) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }]
        })
    }

    fn generate(&self, parts: Vec<Value>) -> Result<ImageData, GenerationError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or(GenerationError::MissingCredential)?;
        let endpoint = self.config.endpoint();
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(&Self::request_payload(parts))
            .send()
            .map_err(|err| {
                GenerationError::upstream(format!(
                    "Gemini request failed ({endpoint}): {}",
                    error_chain_text(&err, 512)
                ))
            })?;
        let payload = response_json_or_error(response)?;
        extract_first_inline_image(&payload)
    }
}

impl ImageGateway for GeminiGateway {
    fn generate_base(&self, prompt: &str) -> Result<ImageData, GenerationError> {
        self.generate(Self::base_parts(prompt))
    }

    fn generate_layer(
        &self,
        source: &ImageData,
        role: SplitRole,
    ) -> Result<ImageData, GenerationError> {
        self.generate(Self::layer_parts(source, role))
            .map_err(|err| GenerationError::split_failed(role, err))
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, GenerationError> {
    let status = response.status();
    let body = response.text().map_err(|err| {
        GenerationError::upstream(format!("Gemini response body read failed: {err}"))
    })?;
    if !status.is_success() {
        return Err(classify_http_failure(status.as_u16(), &body));
    }
    serde_json::from_str(&body)
        .map_err(|err| GenerationError::upstream(format!("Gemini returned invalid JSON: {err}")))
}

/// Rejected keys come back as 401/403, or as a 400 whose message names the
/// API key; those are credential problems, everything else is upstream.
fn classify_http_failure(code: u16, body: &str) -> GenerationError {
    let lowered = body.to_ascii_lowercase();
    if matches!(code, 401 | 403)
        || lowered.contains("api key not valid")
        || lowered.contains("api_key_invalid")
    {
        return GenerationError::MissingCredential;
    }
    GenerationError::upstream(format!(
        "Gemini request failed ({code}): {}",
        truncate_text(body.trim(), 512)
    ))
}

fn error_chain_text(err: &(dyn std::error::Error + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(String::as_str) != Some(trimmed) {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    use super::*;

    #[derive(Debug)]
    struct CapturedRequest {
        request_line: String,
        body: Value,
    }

    /// Serves one canned `(status, body)` response per connection, in order,
    /// and hands back what each request carried.
    fn serve(
        responses: Vec<(u16, String)>,
    ) -> anyhow::Result<(String, JoinHandle<anyhow::Result<Vec<CapturedRequest>>>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let api_base = format!("http://{}/v1beta", listener.local_addr()?);
        let handle = thread::spawn(move || -> anyhow::Result<Vec<CapturedRequest>> {
            let mut captured = Vec::new();
            for (status, body) in responses {
                let (stream, _) = listener.accept()?;
                captured.push(answer(stream, status, &body)?);
            }
            Ok(captured)
        });
        Ok((api_base, handle))
    }

    fn answer(stream: TcpStream, status: u16, body: &str) -> anyhow::Result<CapturedRequest> {
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader.read_line(&mut request_line)?;
        let mut content_length = 0usize;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header)?;
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse()?;
                }
            }
        }
        let mut raw_body = vec![0u8; content_length];
        reader.read_exact(&mut raw_body)?;

        let mut stream = reader.into_inner();
        write!(
            stream,
            "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )?;
        stream.flush()?;
        Ok(CapturedRequest {
            request_line: request_line.trim_end().to_string(),
            body: serde_json::from_slice(&raw_body)?,
        })
    }

    fn local_gateway(api_base: &str, api_key: Option<&str>) -> anyhow::Result<GeminiGateway> {
        GeminiGateway::new(GatewayConfig {
            api_base: api_base.to_string(),
            api_key: api_key.map(str::to_string),
            model: "m".to_string(),
        })
    }

    fn image_response(data: &[u8]) -> String {
        json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "Here is your creative." },
                        { "inlineData": { "mimeType": "image/jpeg", "data": BASE64.encode(data) } },
                    ]
                }
            }]
        })
        .to_string()
    }

    #[test]
    fn endpoint_prefixes_models_path_once() {
        let config = GatewayConfig::default();
        assert_eq!(
            config.endpoint(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        let prefixed = GatewayConfig {
            api_base: "http://localhost:9000/v1/".to_string(),
            ..GatewayConfig::default()
        }
        .with_model("models/custom-image");
        assert_eq!(
            prefixed.endpoint(),
            "http://localhost:9000/v1/models/custom-image:generateContent"
        );
    }

    #[test]
    fn with_model_ignores_blank_values() {
        let config = GatewayConfig::default().with_model("  ");
        assert_eq!(config.model, DEFAULT_IMAGE_MODEL);
        let config = GatewayConfig::default().with_model(" custom ");
        assert_eq!(config.model, "custom");
    }

    #[test]
    fn base_request_carries_only_the_prompt() {
        let payload = GeminiGateway::request_payload(GeminiGateway::base_parts("neon sneaker"));
        assert_eq!(
            payload,
            json!({ "contents": [{ "role": "user", "parts": [{ "text": "neon sneaker" }] }] })
        );
    }

    #[test]
    fn layer_request_carries_instruction_then_png_attachment() {
        let source = ImageData::png(b"pixels".to_vec());
        let parts = GeminiGateway::layer_parts(&source, SplitRole::Background);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], json!(SplitRole::Background.instruction()));
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(parts[1]["inlineData"]["data"], json!(BASE64.encode(b"pixels")));
    }

    #[test]
    fn missing_key_fails_before_any_request() -> anyhow::Result<()> {
        // Nothing listens here; a request would surface as Upstream.
        let gateway = local_gateway("http://127.0.0.1:9/v1beta", None)?;
        assert!(matches!(
            gateway.generate_base("anything"),
            Err(GenerationError::MissingCredential)
        ));
        let split = gateway.generate_layer(&ImageData::png(vec![1]), SplitRole::Subject);
        match split {
            Err(GenerationError::SplitFailed { role, source }) => {
                assert_eq!(role, SplitRole::Subject);
                assert!(matches!(*source, GenerationError::MissingCredential));
            }
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn refused_connection_is_upstream_error() -> anyhow::Result<()> {
        let closed = TcpListener::bind("127.0.0.1:0")?;
        let api_base = format!("http://{}/v1beta", closed.local_addr()?);
        drop(closed);

        let gateway = local_gateway(&api_base, Some("k"))?;
        match gateway.generate_base("anything") {
            Err(GenerationError::Upstream { message }) => {
                assert!(message.starts_with("Gemini request failed ("));
                assert!(message.contains("/models/m:generateContent"));
            }
            other => panic!("unexpected {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn generate_base_posts_prompt_and_returns_first_image() -> anyhow::Result<()> {
        let (api_base, server) = serve(vec![(200, image_response(b"IMG"))])?;
        let gateway = local_gateway(&api_base, Some("k"))?;

        let image = gateway.generate_base("neon sneaker")?;
        assert_eq!(image.bytes(), b"IMG");
        assert_eq!(image.mime_type(), "image/png");

        let captured = server.join().map_err(|_| anyhow::anyhow!("server panicked"))??;
        assert_eq!(
            captured[0].request_line,
            "POST /v1beta/models/m:generateContent?key=k HTTP/1.1"
        );
        assert_eq!(
            captured[0].body,
            json!({ "contents": [{ "role": "user", "parts": [{ "text": "neon sneaker" }] }] })
        );
        Ok(())
    }

    #[test]
    fn generate_layer_sends_source_and_maps_rejections() -> anyhow::Result<()> {
        let (api_base, server) = serve(vec![
            (200, image_response(b"SUBJ")),
            (
                401,
                r#"{"error":{"code":401,"status":"UNAUTHENTICATED"}}"#.to_string(),
            ),
        ])?;
        let gateway = local_gateway(&api_base, Some("k"))?;
        let source = ImageData::png(b"source".to_vec());

        let subject = gateway.generate_layer(&source, SplitRole::Subject)?;
        assert_eq!(subject.bytes(), b"SUBJ");
        match gateway.generate_layer(&source, SplitRole::Background) {
            Err(GenerationError::SplitFailed { role, source }) => {
                assert_eq!(role, SplitRole::Background);
                assert!(matches!(*source, GenerationError::MissingCredential));
            }
            other => panic!("unexpected {other:?}"),
        }

        let captured = server.join().map_err(|_| anyhow::anyhow!("server panicked"))??;
        let parts = &captured[0].body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], json!(SplitRole::Subject.instruction()));
        assert_eq!(parts[1]["inlineData"]["data"], json!(BASE64.encode(b"source")));
        Ok(())
    }

    #[test]
    fn server_errors_and_imageless_replies_surface_through_generate() -> anyhow::Result<()> {
        let (api_base, server) = serve(vec![
            (500, "backend unavailable".to_string()),
            (
                200,
                json!({ "candidates": [{ "content": { "parts": [{ "text": "no can do" }] } }] })
                    .to_string(),
            ),
            (200, "not json".to_string()),
        ])?;
        let gateway = local_gateway(&api_base, Some("k"))?;

        match gateway.generate_base("p") {
            Err(GenerationError::Upstream { message }) => {
                assert_eq!(message, "Gemini request failed (500): backend unavailable");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            gateway.generate_base("p"),
            Err(GenerationError::NoImageInResponse)
        ));
        match gateway.generate_base("p") {
            Err(GenerationError::Upstream { message }) => {
                assert!(message.starts_with("Gemini returned invalid JSON"));
            }
            other => panic!("unexpected {other:?}"),
        }
        server.join().map_err(|_| anyhow::anyhow!("server panicked"))??;
        Ok(())
    }

    #[test]
    fn http_failures_are_classified() {
        assert!(matches!(
            classify_http_failure(403, "forbidden"),
            GenerationError::MissingCredential
        ));
        assert!(matches!(
            classify_http_failure(
                400,
                r#"{"error":{"message":"API key not valid. Please pass a valid API key."}}"#
            ),
            GenerationError::MissingCredential
        ));
        match classify_http_failure(429, "RESOURCE_EXHAUSTED") {
            GenerationError::Upstream { message } => {
                assert_eq!(message, "Gemini request failed (429): RESOURCE_EXHAUSTED");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn truncate_text_appends_ellipsis() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
