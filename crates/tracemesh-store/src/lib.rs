//! SQLite-backed storage for the tracemesh telemetry pipeline: the compressed raw trace
//! log (C1) and the derived conversation/code-change index (C2), colocated in one file.

mod derived;
mod error;
mod schema;
mod trace;

pub use derived::{CodeChange, Conversation, ConversationFlow, DerivedStore, Operation, Turn, TurnType};
pub use error::{Error, Result};
pub use schema::{init_schema, SCHEMA_VERSION};
pub use trace::{SessionAggregate, TraceRow, TraceStore};
