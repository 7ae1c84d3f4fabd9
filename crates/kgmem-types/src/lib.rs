//! Core types and traits for the kgmem knowledge-graph memory client.
//!
//! Domain models mirror the JSON shapes returned by the remote graph memory host; the
//! protocol module holds the JSON-RPC envelope and tool result content blocks.

mod dto;
mod protocol;
mod traits;

pub use dto::*;
pub use protocol::*;
pub use traits::*;
