//! Streaming event demuxer.
//!
//! Splits one backend record into the text lane and the trace lane. A record
//! may feed both lanes; a record that feeds neither is dropped.

use kbrelay_core::event::{BackendEvent, StreamEvent, TextEvent, TraceEvent};

/// Classify a backend record. Text comes before trace when both are present.
pub fn demux(event: BackendEvent) -> Vec<StreamEvent> {
    let mut lanes = Vec::with_capacity(2);

    if let Some(chunk) = event.chunk {
        if chunk.text.is_some() || chunk.attribution.is_some() {
            lanes.push(StreamEvent::Text(TextEvent {
                text: chunk.text.unwrap_or_default(),
                attribution: chunk.attribution,
            }));
        }
    }

    if let Some(trace) = event.trace {
        lanes.push(StreamEvent::Trace(TraceEvent { trace }));
    }

    lanes
}
