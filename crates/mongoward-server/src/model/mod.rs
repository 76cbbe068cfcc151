pub mod common;

pub use common::{AppState, Configuration};
