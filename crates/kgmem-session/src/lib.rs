//! Tool Invocation Layer: one `Session` multiplexes concurrent tool calls over a carrier.

mod normalize;
mod pending;
mod session;

pub use kgmem_types::{ClientError, ToolInvoker};
pub use normalize::{normalize_tool_result, reject_error_payload, COMPLETED_MESSAGE};
pub use session::{Session, SessionConfig};
