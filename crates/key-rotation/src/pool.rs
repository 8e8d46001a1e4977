//! Rotating pools of credentials and egress routes
//!
//! A pool is an immutable, non-empty list plus a shared cursor. `current`
//! reads the entry under the cursor; `advance` moves the cursor one step
//! (mod length) and reports whether it wrapped back to the first entry.
//!
//! The cursor is an `AtomicUsize` that only ever holds values in `[0, len)`:
//! every write goes through a single compare-and-swap that stores
//! `(c + 1) % len`, so readers never see an out-of-range or half-updated value.
//! Rotation is global: once `advance` returns, every caller sees the new entry.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::Secret;
use tracing::{info, warn};
use transport::EgressRoute;

use crate::error::{Error, Result};

/// API key for one provider. Redacted in Debug output.
#[derive(Clone)]
pub struct Credential(Secret<String>);

impl Credential {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(Secret::new(raw.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.0)
    }
}

/// Ordered, non-empty list of entries with a shared rotation cursor.
pub struct RotatingPool<T> {
    label: String,
    entries: Vec<T>,
    cursor: AtomicUsize,
}

impl<T> fmt::Debug for RotatingPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatingPool")
            .field("label", &self.label)
            .field("size", &self.entries.len())
            .field("position", &self.cursor.load(Ordering::Acquire))
            .finish()
    }
}

/// Pool of API keys for one provider.
pub type CredentialPool = RotatingPool<Credential>;

/// Pool of proxy routes for one provider.
pub type EgressPool = RotatingPool<EgressRoute>;

impl<T: Clone> RotatingPool<T> {
    /// Build a pool starting at the first entry. Fails if `entries` is empty.
    pub fn new(label: impl Into<String>, entries: Vec<T>) -> Result<Self> {
        let label = label.into();
        if entries.is_empty() {
            return Err(Error::EmptyPool { pool: label });
        }
        info!(pool = %label, size = entries.len(), "pool initialized");
        Ok(Self {
            label,
            entries,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Entry under the cursor.
    pub fn current(&self) -> T {
        self.snapshot().1
    }

    /// Cursor position and the entry under it, read from a single load.
    pub fn snapshot(&self) -> (usize, T) {
        let position = self.cursor.load(Ordering::Acquire);
        (position, self.entries[position].clone())
    }

    /// Move to the next entry. Returns `true` when the cursor wrapped from the
    /// last entry back to the first.
    pub fn advance(&self) -> bool {
        let len = self.entries.len();
        let previous = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
            .unwrap_or_else(|c| c);
        let next = (previous + 1) % len;
        let wrapped = next == 0;

        if wrapped {
            warn!(
                pool = %self.label,
                size = len,
                "every entry has been cycled, back to the first"
            );
        } else {
            info!(
                pool = %self.label,
                from = previous + 1,
                to = next + 1,
                size = len,
                "rotated to next entry"
            );
        }
        wrapped
    }

    /// Put the cursor back on the first entry.
    pub fn reset(&self) {
        self.cursor.store(0, Ordering::Release);
    }

    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Pool summary for the health endpoint. Never includes entry values.
    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "pool": self.label,
            "size": self.entries.len(),
            "position": self.position(),
        })
    }
}

impl RotatingPool<Credential> {
    /// Build a credential pool from raw keys. Blank entries are dropped; the
    /// pool fails if nothing usable remains (no keys, or a single empty key).
    pub fn from_keys<S: AsRef<str>>(label: impl Into<String>, keys: &[S]) -> Result<Self> {
        let label = label.into();
        let mut credentials = Vec::with_capacity(keys.len());
        for (index, key) in keys.iter().enumerate() {
            let key = key.as_ref().trim();
            if key.is_empty() {
                if keys.len() > 1 {
                    warn!(pool = %label, entry = index + 1, "skipping blank credential entry");
                }
                continue;
            }
            credentials.push(Credential::new(key));
        }
        Self::new(label, credentials)
    }

    /// Build a credential pool from a comma-separated list.
    pub fn from_csv(label: impl Into<String>, csv: &str) -> Result<Self> {
        let keys: Vec<&str> = csv.split(',').collect();
        Self::from_keys(label, &keys)
    }
}

impl RotatingPool<EgressRoute> {
    /// Build an egress pool from proxy URLs. Entries that fail to parse are
    /// skipped with a warning; the pool fails only if none survive.
    pub fn from_urls<S: AsRef<str>>(label: impl Into<String>, urls: &[S]) -> Result<Self> {
        let label = label.into();
        let mut routes = Vec::with_capacity(urls.len());
        for (index, raw) in urls.iter().enumerate() {
            let raw = raw.as_ref();
            if raw.trim().is_empty() {
                continue;
            }
            match EgressRoute::parse(raw) {
                Ok(route) => routes.push(route),
                Err(e) => {
                    warn!(
                        pool = %label,
                        entry = index + 1,
                        error = %e,
                        "skipping invalid egress route"
                    );
                }
            }
        }
        Self::new(label, routes)
    }
}
