pub mod bootstrap;
pub mod hosts;
pub mod identity;
pub mod peer;
pub mod reconciler;
pub mod recovery;
pub mod registry;

use mongoward_common::MongowardError;
use mongoward_engine::EngineError;

pub(crate) fn engine_err(err: EngineError) -> MongowardError {
    MongowardError::Engine(err.to_string())
}
