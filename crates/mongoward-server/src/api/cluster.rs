//! Cluster observation endpoints

use actix_web::{get, web, HttpResponse, Responder};
use serde::Serialize;
use serde_json::json;

use mongoward_core::{PeerOplog, PeerPrimary};
use mongoward_engine::EngineState;

use crate::model::common::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MemberEntry {
    id: i32,
    host: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    hostname: String,
    ip: String,
    local_testing: bool,
    authenticated: bool,
    replica_set: String,
    reconcile_cycles: u64,
    started_at: String,
}

/// This node's opinion of the current primary, used by peers for the
/// split-brain consensus.
#[get("/primary")]
async fn primary(data: web::Data<AppState>) -> web::Json<PeerPrimary> {
    let opinion = match data.engine.status().await {
        Ok(EngineState::Initialized(rs_status)) => PeerPrimary {
            is_primary: rs_status.is_primary(),
            primary: rs_status.primary,
        },
        _ => PeerPrimary {
            primary: None,
            is_primary: false,
        },
    };
    web::Json(opinion)
}

/// This node's newest oplog timestamp, used by peers for stale-data
/// detection.
#[get("/oplog")]
async fn oplog(data: web::Data<AppState>) -> web::Json<PeerOplog> {
    let timestamp = data.engine.latest_oplog().await.ok().flatten();
    web::Json(PeerOplog {
        hostname: data.identity.hostname.clone(),
        ip: data.identity.address.clone(),
        timestamp,
    })
}

/// Raw engine state read-through.
#[get("/status")]
async fn status(data: web::Data<AppState>) -> impl Responder {
    match data.engine.status().await {
        Ok(EngineState::Initialized(status)) => HttpResponse::Ok().json(json!({
            "state": "initialized",
            "replicaSet": status,
        })),
        Ok(EngineState::NotInitialized) => {
            HttpResponse::Ok().json(json!({ "state": "notInitialized" }))
        }
        Ok(EngineState::NeedsAuth) => HttpResponse::Ok().json(json!({ "state": "needsAuth" })),
        Err(err) => HttpResponse::ServiceUnavailable().json(json!({ "error": err.to_string() })),
    }
}

/// Current replica-set configuration members.
#[get("/members")]
async fn members(data: web::Data<AppState>) -> impl Responder {
    match data.engine.get_config().await {
        Ok(config) => {
            let entries: Vec<MemberEntry> = config
                .member_ids()
                .into_iter()
                .zip(config.member_hosts())
                .map(|(id, host)| MemberEntry { id, host })
                .collect();
            HttpResponse::Ok().json(json!({
                "version": config.version(),
                "members": entries,
            }))
        }
        Err(err) => HttpResponse::ServiceUnavailable().json(json!({ "error": err.to_string() })),
    }
}

/// Controller identity and counters for operators.
#[get("/info")]
async fn info(data: web::Data<AppState>) -> web::Json<InfoResponse> {
    web::Json(InfoResponse {
        hostname: data.identity.hostname.clone(),
        ip: data.identity.address.clone(),
        local_testing: data.identity.local_testing,
        authenticated: data.engine.is_authenticated().await,
        replica_set: data.configuration.replica_set_name(),
        reconcile_cycles: data.reconciler.cycles(),
        started_at: data.started_at.to_rfc3339(),
    })
}
