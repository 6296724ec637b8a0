//! Citation extraction and deduplication.
//!
//! Two sources feed one accumulator: attribution blocks on text chunks, and
//! knowledge-base lookup results in orchestration traces. Each source URI is
//! kept at most once across the whole answer, credited to the citation that
//! first introduced it. Citation order is first-appearance order.
//!
//! Both payloads are read as loose JSON. Missing or oddly shaped fields mean
//! "nothing to extract", never an error.

use kbrelay_core::citation::{Citation, Reference, title_from_uri};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, trace};

const SOURCE_URI_METADATA: &str = "x-amz-bedrock-kb-source-uri";
const TRACE_REFERENCES: &str =
    "/trace/orchestrationTrace/observation/knowledgeBaseLookupOutput/retrievedReferences";

/// Accumulates citations for one answer.
#[derive(Debug, Default)]
pub struct CitationAccumulator {
    citations: Vec<Citation>,
    seen: HashSet<String>,
}

impl CitationAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingest a chunk's `attribution` block. Returns the number of new
    /// references kept.
    ///
    /// Only S3-located references count. Their title comes from the
    /// source-URI metadata, or is empty when that is missing.
    pub fn ingest_attribution(&mut self, attribution: &Value) -> usize {
        let Some(entries) = attribution.get("citations").and_then(Value::as_array) else {
            return 0;
        };

        let mut added = 0;
        for entry in entries {
            let text = entry
                .pointer("/generatedResponsePart/textResponsePart/text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();

            let references: Vec<Reference> = retrieved_references(entry)
                .filter(|r| r.pointer("/location/type").and_then(Value::as_str) == Some("S3"))
                .filter_map(|r| {
                    let uri = s3_uri(r)?;
                    let title = r
                        .get("metadata")
                        .and_then(|m| m.get(SOURCE_URI_METADATA))
                        .and_then(Value::as_str)
                        .map(title_from_uri)
                        .unwrap_or_default();
                    Some(Reference {
                        source_uri: uri.to_string(),
                        title: title.to_string(),
                    })
                })
                .collect();

            added += self.push(text, references);
        }
        added
    }

    /// Ingest an orchestration trace. Returns the number of new references
    /// kept. New references become one citation with empty text.
    pub fn ingest_trace(&mut self, trace_value: &Value) -> usize {
        let Some(refs) = trace_value.pointer(TRACE_REFERENCES).and_then(Value::as_array) else {
            return 0;
        };
        trace!(count = refs.len(), "Knowledge base references in trace");

        let references: Vec<Reference> = refs
            .iter()
            .filter_map(s3_uri)
            .map(Reference::from_uri)
            .collect();

        self.push(String::new(), references)
    }

    /// Keep the references not seen before, within this batch or earlier.
    fn push(&mut self, text: String, references: Vec<Reference>) -> usize {
        let fresh: Vec<Reference> = references
            .into_iter()
            .filter(|r| self.seen.insert(r.source_uri.clone()))
            .collect();

        if fresh.is_empty() {
            return 0;
        }

        let added = fresh.len();
        debug!(
            added,
            titles = ?fresh.iter().map(|r| r.title.as_str()).collect::<Vec<_>>(),
            "Citation added"
        );
        self.citations.push(Citation {
            text,
            references: fresh,
        });
        added
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    /// Distinct source URIs so far.
    pub fn reference_count(&self) -> usize {
        self.seen.len()
    }

    pub fn into_citations(self) -> Vec<Citation> {
        self.citations
    }
}

fn retrieved_references(entry: &Value) -> impl Iterator<Item = &Value> {
    entry
        .get("retrievedReferences")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Non-empty `location.s3Location.uri`.
fn s3_uri(reference: &Value) -> Option<&str> {
    reference
        .pointer("/location/s3Location/uri")
        .and_then(Value::as_str)
        .filter(|uri| !uri.is_empty())
}
