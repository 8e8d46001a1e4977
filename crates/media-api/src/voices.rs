//! Voice catalog loaded from a JSON file
//!
//! The file lists the voices a deployment offers:
//! `{"voices":[{"voice_id":"...","name":"..."}]}`. It is read once at
//! startup and never written back.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::constants::VOICES_PER_PAGE;
use crate::error::{Error, Result};

/// One selectable voice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub voice_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct VoicesFile {
    voices: Vec<Voice>,
}

/// One page of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoicePage {
    pub page: usize,
    pub total_pages: usize,
    pub voices: Vec<Voice>,
    pub has_prev: bool,
    pub has_next: bool,
}

/// Read-only list of voices in file order.
#[derive(Debug, Clone, Default)]
pub struct VoiceCatalog {
    voices: Vec<Voice>,
}

impl VoiceCatalog {
    pub fn new(voices: Vec<Voice>) -> Self {
        Self { voices }
    }

    /// Load the catalog from `path`. A missing or malformed file is an error.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Catalog(format!("reading {}: {e}", path.display())))?;
        let file: VoicesFile = serde_json::from_str(&contents)
            .map_err(|e| Error::Catalog(format!("parsing {}: {e}", path.display())))?;
        info!(path = %path.display(), voices = file.voices.len(), "loaded voice catalog");
        Ok(Self::new(file.voices))
    }

    pub fn find(&self, voice_id: &str) -> Option<&Voice> {
        self.voices.iter().find(|v| v.voice_id == voice_id)
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    /// Zero-based page of `VOICES_PER_PAGE` voices. Pages past the end are empty.
    pub fn page(&self, page: usize) -> VoicePage {
        let total_pages = self.voices.len().div_ceil(VOICES_PER_PAGE);
        let start = page.saturating_mul(VOICES_PER_PAGE).min(self.voices.len());
        let end = (start + VOICES_PER_PAGE).min(self.voices.len());
        VoicePage {
            page,
            total_pages,
            voices: self.voices[start..end].to_vec(),
            has_prev: page > 0,
            has_next: end < self.voices.len(),
        }
    }
}
