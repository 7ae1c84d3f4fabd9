//! Carriers for the tool-calling protocol: SSE stream + HTTP POST, or a subprocess's stdio.

mod config;
#[cfg(feature = "test-util")]
pub mod memory;
mod sse;
mod stdio;
mod task;

pub use config::{connect, TransportConfig, TransportKind, DEFAULT_SERVER_URL};
pub use kgmem_types::{Carrier, CarrierError};
pub use sse::{SseCarrier, SseDecoder, SseEvent};
pub use stdio::StdioCarrier;

#[cfg(feature = "test-util")]
pub use memory::ChannelCarrier;
