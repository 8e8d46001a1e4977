//! Provider clients for video narration
//!
//! Builds provider-specific requests and runs them through a
//! `key_rotation::Invoker`, so every call gets credential rotation, egress
//! rotation and cancellation for free. This crate knows the wire formats;
//! it never decides when to retry.
//!
//! Narration flow:
//! 1. `ScriptClient::generate_script()` turns a video into timestamped lines
//! 2. `ScriptClient::revise_script()` applies user instructions to a script
//! 3. `VoiceCatalog::load()` reads the voices the deployment offers
//! 4. `narrate()` splits the script and calls `SpeechClient::text_to_speech()`
//!    once per line, checking cancellation between lines

pub mod constants;
pub mod elevenlabs;
pub mod error;
pub mod gemini;
pub mod script;
pub mod voices;

pub use constants::*;
pub use elevenlabs::{SpeechClient, VoiceSettings};
pub use error::{Error, Result};
pub use gemini::ScriptClient;
pub use script::{Clip, FailedLine, Narration, SpokenLine, narrate, spoken_lines};
pub use voices::{Voice, VoiceCatalog, VoicePage};
