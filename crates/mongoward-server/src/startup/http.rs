//! Admin/peer RPC HTTP server

use std::sync::Arc;

use actix_web::{dev::Server, web, App, HttpServer};
use tracing::info;

use crate::api;
use crate::model::common::AppState;

/// Build the admin server. The returned `Server` future runs until stopped;
/// handlers serve concurrently with the reconciler and share nothing mutable
/// beyond the engine adapter's connection.
pub fn admin_server(state: Arc<AppState>, port: u16) -> std::io::Result<Server> {
    let data = web::Data::from(state);

    info!(port, "starting admin server");
    let server = HttpServer::new(move || App::new().app_data(data.clone()).service(api::routes()))
        .bind(("0.0.0.0", port))?
        .run();

    Ok(server)
}
