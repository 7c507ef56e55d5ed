//! TOML settings for a knowledge base.
//!
//! ```toml
//! [graph]
//! top_k = 8
//! min_score = 0.25
//! link_policy = "directed"
//!
//! [graph.weights]
//! tag_overlap = 0.5
//!
//! [search]
//! mode = "hybrid"
//! top_n = 10
//!
//! [refresh]
//! incremental = true
//! max_incremental_fraction = 0.5
//!
//! [embedding]
//! model = "all-minilm-l6-v2"
//! ```
//!
//! Every section and key is optional; missing values take their defaults.

use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

use monoid_graph::{GraphConfig, SearchOptions};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to read settings file at {path:?}.")]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse settings file at {path:?}.")]
    ParseConfig {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{message}")]
    Validation { message: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub graph: GraphConfig,
    pub search: SearchOptions,
    pub refresh: Refresh,
    pub embedding: EmbeddingSettings,
}

/// When [`crate::KnowledgeBase::refresh`] may take the incremental path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Refresh {
    pub incremental: bool,
    /// Above this share of changed notes a full rebuild is cheaper.
    pub max_incremental_fraction: f64,
}

impl Default for Refresh {
    fn default() -> Self {
        Self {
            incremental: true,
            max_incremental_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingSettings {
    /// Model every note and query embedding should come from. Notes carrying
    /// another model's embedding are re-embedded.
    pub model: Option<String>,
}

pub fn load(path: &Path) -> Result<Settings> {
    let raw = fs::read_to_string(path).map_err(|err| Error::ReadConfig {
        path: path.to_path_buf(),
        source: err,
    })?;

    let mut settings: Settings = toml::from_str(&raw).map_err(|err| Error::ParseConfig {
        path: path.to_path_buf(),
        source: err,
    })?;

    normalize(&mut settings);

    validate(&settings)?;

    tracing::debug!(path = %path.display(), "Loaded knowledge base settings.");

    Ok(settings)
}

pub fn validate(settings: &Settings) -> Result<()> {
    settings.graph.validate().map_err(|err| Error::Validation {
        message: format!("graph: {err}"),
    })?;
    settings.search.validate().map_err(|err| Error::Validation {
        message: format!("search: {err}"),
    })?;

    let fraction = settings.refresh.max_incremental_fraction;
    if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
        return Err(Error::Validation {
            message: "refresh.max_incremental_fraction must be in [0, 1].".to_string(),
        });
    }

    Ok(())
}

fn normalize(settings: &mut Settings) {
    settings.embedding.model = settings
        .embedding
        .model
        .take()
        .map(|model| model.trim().to_string())
        .filter(|model| !model.is_empty());
}
