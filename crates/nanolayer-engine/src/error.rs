use nanolayer_contracts::layers::SplitRole;
use nanolayer_contracts::prompts::{
    BASE_FAILURE_NOTICE, MISSING_CREDENTIAL_HINT, NO_IMAGE_HINT, SPLIT_FAILURE_NOTICE,
    UPSTREAM_HINT,
};

/// Failures of a single gateway call.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// API key absent, or rejected by the service.
    #[error("API key missing or invalid; set GEMINI_API_KEY")]
    MissingCredential,

    /// The call succeeded but carried no inline image part.
    #[error("no image data found in response")]
    NoImageInResponse,

    /// Transport, quota or service failure.
    #[error("upstream request failed: {message}")]
    Upstream { message: String },

    #[error("failed to generate {role} layer")]
    SplitFailed {
        role: SplitRole,
        #[source]
        source: Box<GenerationError>,
    },
}

impl GenerationError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    pub fn split_failed(role: SplitRole, source: GenerationError) -> Self {
        match source {
            already @ Self::SplitFailed { .. } => already,
            other => Self::SplitFailed {
                role,
                source: Box::new(other),
            },
        }
    }

    /// The underlying failure, looking through split wrappers.
    pub fn root(&self) -> &GenerationError {
        match self {
            Self::SplitFailed { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::NoImageInResponse => "no_image_in_response",
            Self::Upstream { .. } => "upstream_error",
            Self::SplitFailed { .. } => "split_failed",
        }
    }

    /// Text of the SYSTEM chat message posted for this failure.
    pub fn user_notice(&self) -> String {
        let hint = match self {
            Self::SplitFailed { .. } => return SPLIT_FAILURE_NOTICE.to_string(),
            Self::MissingCredential => MISSING_CREDENTIAL_HINT,
            Self::NoImageInResponse => NO_IMAGE_HINT,
            Self::Upstream { .. } => UPSTREAM_HINT,
        };
        format!("{BASE_FAILURE_NOTICE} {hint}")
    }
}
