//! Admin and peer RPC surface
//!
//! Read-only JSON endpoints served on the sidecar interface. `/health`,
//! `/primary`, and `/oplog` double as the peer RPC consumed by other
//! controllers; the rest are operator read-throughs.

pub mod cluster;
pub mod health;

pub fn routes() -> actix_web::Scope {
    actix_web::web::scope("")
        .service(health::health)
        .service(cluster::primary)
        .service(cluster::oplog)
        .service(cluster::status)
        .service(cluster::members)
        .service(cluster::info)
}
