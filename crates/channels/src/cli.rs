//! Terminal delivery for `kbrelay ask`.
//!
//! Chunks are written as they arrive so the answer streams in place; the
//! complete piece adds a numbered source list; errors go on their own line.

use async_trait::async_trait;
use kbrelay_core::channel::{DeliveryPiece, DeliverySink};
use kbrelay_core::citation::FinalResult;
use kbrelay_core::error::DeliveryError;
use std::io::Write;
use std::sync::Mutex;

/// Writes pieces to stdout, or any other writer.
pub struct StdoutSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

fn write_sources(out: &mut dyn Write, result: &FinalResult) -> std::io::Result<()> {
    writeln!(out)?;
    let references: Vec<_> = result
        .citations
        .iter()
        .flat_map(|c| c.references.iter())
        .collect();
    if references.is_empty() {
        return Ok(());
    }

    writeln!(out, "\nSources:")?;
    for (i, reference) in references.iter().enumerate() {
        let title = if reference.title.is_empty() {
            &reference.source_uri
        } else {
            &reference.title
        };
        writeln!(out, "  [{}] {} ({})", i + 1, title, reference.source_uri)?;
    }
    Ok(())
}

#[async_trait]
impl DeliverySink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn send(&self, piece: &DeliveryPiece) -> Result<(), DeliveryError> {
        let mut out = self.out.lock().map_err(|_| DeliveryError::DeliveryFailed {
            channel: "stdout".into(),
            reason: "writer poisoned".into(),
        })?;

        let written = match piece {
            DeliveryPiece::Chunk { chunk } => write!(out, "{chunk}"),
            DeliveryPiece::Complete { result } => write_sources(&mut **out, result),
            DeliveryPiece::Error { error } => writeln!(out, "\nError: {error}"),
        };

        written
            .and_then(|_| out.flush())
            .map_err(|e| DeliveryError::DeliveryFailed {
                channel: "stdout".into(),
                reason: e.to_string(),
            })
    }
}
