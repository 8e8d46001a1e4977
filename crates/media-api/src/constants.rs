//! Provider endpoints, models and prompt templates
//!
//! Defaults only. Base URLs and model names are overridable through the
//! gateway configuration.

/// Gemini REST API root
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Model used for script generation and revision
pub const GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Header carrying the Gemini API key
pub const GEMINI_KEY_HEADER: &str = "x-goog-api-key";

/// ElevenLabs REST API root (includes the version segment)
pub const ELEVENLABS_BASE_URL: &str = "https://api.elevenlabs.io/v1";

/// Default speech model
pub const ELEVENLABS_MODEL_ID: &str = "eleven_multilingual_v2";

/// Header carrying the ElevenLabs API key
pub const ELEVENLABS_KEY_HEADER: &str = "xi-api-key";

/// Default voice stability
pub const DEFAULT_STABILITY: f32 = 0.75;

/// Default voice clarity (ElevenLabs `similarity_boost`)
pub const DEFAULT_CLARITY: f32 = 0.75;

/// Default speaking speed
pub const DEFAULT_SPEED: f32 = 1.0;

/// Fixed voice style exaggeration sent with every request
pub const VOICE_STYLE: f32 = 0.5;

/// Voices per catalog page
pub const VOICES_PER_PAGE: usize = 6;

/// Line format every generated or revised script must follow.
pub const SCRIPT_LINE_FORMAT: &str = "HH:MM:SS-HH:MM:SS: description";

/// Script generation prompt. `{style}` is replaced with the requested style.
pub const SCRIPT_PROMPT: &str = "Analyze this video and create a concise, scene-by-scene script. \
The format must be exactly 'HH:MM:SS-HH:MM:SS: description'. \
The descriptions must be brief and directly correspond to the visual action in that video segment. \
Do not add information that is not present in the video. \
The requested style is: '{style}'.";

/// Script revision prompt. `{script}` and `{instructions}` are substituted.
pub const REVISION_PROMPT: &str = "You are a script editor. Below is an original video script. \
Revise it based on the user's instructions. \
Maintain the exact 'HH:MM:SS-HH:MM:SS: description' format for every line. \
Keep the descriptions concise and relevant to the original script's context.\n\n\
Original Script:\n{script}\n\nUser Instructions:\n{instructions}";
