//! Engine adapter for mongoward
//!
//! Wraps the engine's admin command interface in a narrow, typed surface and
//! normalizes driver errors into a stable taxonomy at this boundary. Nothing
//! outside this crate inspects driver error codes or message fragments.

pub mod adapter;
pub mod error;
pub mod model;

pub use adapter::{EngineAdapter, EngineSettings, ProbeResult};
pub use error::EngineError;
pub use model::{
    EngineState, MemberHealth, MemberState, OplogTimestamp, ReplicaSetConfig, ReplicaSetStatus,
};
