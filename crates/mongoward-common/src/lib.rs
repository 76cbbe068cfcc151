//! Common types, errors, and utilities shared by the mongoward crates.

pub mod error;
pub mod keyfile;
pub mod utils;

pub use error::MongowardError;
pub use utils::{derive_hostname, is_local_address, local_ip, parse_hostname, sort_addresses};
