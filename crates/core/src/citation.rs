//! Citation and final-result types.
//!
//! Field names on the wire follow the web client's expectations
//! (`source`, `responsetext`).

use serde::{Deserialize, Serialize};

/// One source document backing a citation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    #[serde(rename = "source")]
    pub source_uri: String,
    pub title: String,
}

impl Reference {
    /// Build a reference whose title is the final path segment of `uri`.
    pub fn from_uri(uri: impl Into<String>) -> Self {
        let source_uri = uri.into();
        let title = title_from_uri(&source_uri).to_string();
        Self { source_uri, title }
    }
}

/// Final `/`-delimited segment of a URI (the whole string if it has none).
pub fn title_from_uri(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

/// A claim-to-source association.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Response excerpt the references support. Empty for trace citations.
    #[serde(default)]
    pub text: String,
    pub references: Vec<Reference>,
}

/// The aggregate record built once the backend stream is exhausted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalResult {
    #[serde(rename = "responsetext")]
    pub full_text: String,
    pub citations: Vec<Citation>,
}
