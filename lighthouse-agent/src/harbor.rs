//! Harbor-type registry
//!
//! A harbor type decides how an instance's metrics are shipped:
//! - `raw`: one merged document per cycle, posted to `{base}{suffix}`
//! - `cargo`: one sample per metric field, posted in batches to `{base}{suffix}/batch`
//!
//! The table is parsed once at startup from the bundled `definitions.json` and is
//! read-only afterwards.

use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Definitions shipped inside the binary
pub const BUNDLED_DEFINITIONS: &str = include_str!("../definitions.json");

/// Ingest host used when an instance has no endpoint override
pub const DEFAULT_INGEST_HOST: &str = "https://harborscale.com";

const INGEST_PATH: &str = "/api/v2/ingest";

#[derive(Debug, Error)]
pub enum HarborError {
    #[error("harbor definitions are malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unknown harbor type: {0}")]
    UnknownType(String),
}

/// Delivery mode of a harbor type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Raw,
    Cargo,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Raw => write!(f, "raw"),
            Mode::Cargo => write!(f, "cargo"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarborDef {
    pub mode: Mode,
    #[serde(default)]
    pub endpoint_suffix: String,
}

#[derive(Debug, Clone, Default)]
pub struct HarborRegistry {
    types: HashMap<String, HarborDef>,
}

impl HarborRegistry {
    /// Parse a definition set. Any malformed entry rejects the whole set.
    pub fn load(definitions: &str) -> Result<Self, HarborError> {
        let types: HashMap<String, HarborDef> = serde_json::from_str(definitions)?;
        Ok(Self { types })
    }

    pub fn bundled() -> Result<Self, HarborError> {
        Self::load(BUNDLED_DEFINITIONS)
    }

    pub fn resolve(&self, type_name: &str) -> Result<&HarborDef, HarborError> {
        self.types
            .get(type_name)
            .ok_or_else(|| HarborError::UnknownType(type_name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }
}

/// Base ingest URL for an instance.
///
/// Without an override the harbor id is part of the path. With an override the
/// override replaces host and id together, so the id is not in the path at all.
pub fn base_url(endpoint: Option<&str>, harbor_id: &str) -> String {
    match endpoint.map(str::trim).filter(|e| !e.is_empty()) {
        Some(endpoint) => format!("{}{}", endpoint.trim_end_matches('/'), INGEST_PATH),
        None => format!("{}{}/{}", DEFAULT_INGEST_HOST, INGEST_PATH, harbor_id),
    }
}

/// Final delivery URL for a harbor type (raw mode target, cargo batches add `/batch`)
pub fn ingest_url(endpoint: Option<&str>, harbor_id: &str, def: &HarborDef) -> String {
    format!("{}{}", base_url(endpoint, harbor_id), def.endpoint_suffix)
}
