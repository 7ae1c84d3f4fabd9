//! In-process knowledge-graph memory host speaking the tool-calling protocol.
//!
//! Used to exercise the client end to end over every carrier: serve it on an in-memory
//! channel ([`serve_carrier`]), on stdin/stdout ([`serve_lines`], the `kgmem-fake-host`
//! binary), or over SSE ([`sse::router`]).

mod graph;
mod host;
mod queue;
mod serve;
pub mod sse;

pub use graph::{GraphError, InMemoryGraph, PendingEpisode, DEFAULT_GROUP};
pub use host::{GraphHost, STATUS_URI};
pub use queue::{IngestQueue, QueueError};
pub use serve::{serve_carrier, serve_lines};
