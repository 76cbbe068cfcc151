//! Controller binary internals: configuration, the admin/peer RPC surface,
//! and startup plumbing.

pub mod api;
pub mod model;
pub mod startup;
