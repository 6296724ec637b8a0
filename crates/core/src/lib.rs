//! # kbrelay Core
//!
//! Domain types, collaborator traits, and error definitions for the kbrelay
//! streaming orchestrator. Everything else in the workspace implements
//! against this crate.
//!
//! Each external collaborator is a trait here:
//! - [`GenerationBackend`]: the agent that produces the answer and traces
//! - [`DeliverySink`]: the client channel pieces are pushed to
//! - [`AnalyticsSink`]: the fire-and-forget record of each answer

pub mod analytics;
pub mod backend;
pub mod channel;
pub mod citation;
pub mod error;
pub mod event;
pub mod request;

// Re-export key types at crate root for ergonomics
pub use analytics::{AnalyticsRecord, AnalyticsSink};
pub use backend::{EventStream, GenerationBackend, InvocationInput};
pub use channel::{DeliveryPiece, DeliverySink, NullSink};
pub use citation::{Citation, FinalResult, Reference};
pub use error::{Error, Result};
pub use event::{BackendEvent, StreamEvent, TextEvent, TraceEvent};
pub use request::{GenerationRequest, UserRole};
