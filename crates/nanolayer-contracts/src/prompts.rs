//! Fixed model instructions and the user-facing notices the studio posts.

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";

pub const SPLIT_SUBJECT_INSTRUCTION: &str = "Identify the main subject of this image (the product, person, or object being advertised).
Regenerate the image keeping ONLY the subject.
Make the entire background solid white or transparent if possible.
Focus strictly on edge precision for the subject.";

pub const SPLIT_BACKGROUND_INSTRUCTION: &str = "Identify the background of this image.
Remove the main foreground subject entirely.
Inpaint (fill) the area where the subject was to create a clean, empty background scene suitable for overlaying text or other elements.";

pub const WELCOME_MESSAGE: &str = "Hello! I am NanoLayer.
I can generate creative ad assets and then \"split\" them into editable layers (Subject vs. Background) using the Gemini image model.

Try something like: \"Generate a futuristic sneaker advertisement on a neon street.\"";

pub const BASE_TASK_LABEL: &str = "Generating creative concept...";
pub const SPLIT_TASK_LABEL: &str = "Splitting layers (Subject & Background)...";

pub const BASE_SUCCESS_NOTICE: &str =
    "I've generated the base creative based on your request. You can now split it into layers.";
pub const SPLIT_STARTED_NOTICE: &str =
    "Splitting image into separate layers. This might take a moment...";
pub const SPLIT_SUCCESS_NOTICE: &str =
    "Layers separated successfully! The isolated subject and the clean background are ready in the workspace.";

pub const BASE_FAILURE_NOTICE: &str = "Sorry, I encountered an error generating the image.";
pub const MISSING_CREDENTIAL_HINT: &str =
    "It seems the API Key is missing or invalid. Please set GEMINI_API_KEY in your environment and restart.";
pub const NO_IMAGE_HINT: &str = "The model returned no image. Please try a different prompt.";
pub const UPSTREAM_HINT: &str = "Please try again in a moment or check the event log.";
pub const SPLIT_FAILURE_NOTICE: &str =
    "Failed to split layers. The model might be busy or the image complexity is too high.";
