//! Delivery channel adapters for kbrelay.
//!
//! Every adapter implements `kbrelay_core::DeliverySink`, so the orchestrator
//! never knows how a piece reaches the client.
//!
//! Available sinks:
//! - **Connection**: push to a registered WebSocket connection
//! - **Event stream**: feed an SSE response
//! - **Callback**: POST to an external connection manager, optionally signed
//! - **Stdout**: stream to the terminal
//! - **Collecting**: record pieces in memory

pub mod callback;
pub mod cli;
pub mod collecting;
pub mod connection;
pub mod event_stream;

pub use callback::{CallbackConfig, CallbackSink};
pub use cli::StdoutSink;
pub use collecting::CollectingSink;
pub use connection::{ConnectionRegistry, ConnectionSink};
pub use event_stream::EventStreamSink;
