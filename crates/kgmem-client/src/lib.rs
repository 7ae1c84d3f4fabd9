//! Memory client for a remote temporal knowledge-graph host.
//!
//! `MemoryClient` wraps a [`ToolInvoker`] (normally a [`Session`]) with one typed method
//! per graph operation. Ingestion is asynchronous on the host: `add_memory` returns once
//! the episode is queued, and searches only see it after processing finishes.

mod client;
mod config;
mod decode;
mod wait;

pub use client::{MemoryClient, STATUS_RESOURCE_URI};
pub use config::ClientConfig;
pub use kgmem_session::{Session, SessionConfig};
pub use kgmem_transport::{TransportConfig, TransportKind};
pub use kgmem_types::*;
pub use wait::BackoffPolicy;
