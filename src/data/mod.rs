//! Trace data model: argument types, values and event type definitions.

pub mod args;
pub mod event_type;
pub mod variable;

pub use args::{ArgValue, ArgumentData};
pub use event_type::{Builtin, EventClass, EventFlags, EventType};
pub use variable::{parse_signature, ArgType, ScalarType, Signature, Variable};
