//! Discovery, bootstrap, and steady-state reconciliation for mongoward.
//!
//! The controller turns independently scheduled engine processes into one
//! replica set: it resolves this node's identity, discovers peers through the
//! registry, elects a bootstrap founder, and then keeps the set's membership
//! aligned with the registry while defending against split-brain and stale
//! primaries.

pub mod model;
pub mod service;

pub use model::{MembershipView, NodeIdentity, PeerHealth, PeerOplog, PeerPrimary};
pub use service::bootstrap::{BootstrapCoordinator, BootstrapSettings};
pub use service::hosts::HostsFileManager;
pub use service::identity::{IdentityResolver, IdentitySettings};
pub use service::peer::PeerClient;
pub use service::reconciler::{Reconciler, ReconcilerSettings};
pub use service::registry::RegistryClient;
