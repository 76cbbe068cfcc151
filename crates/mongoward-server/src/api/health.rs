use actix_web::{get, web};

use mongoward_core::PeerHealth;

/// Controller liveness. Peers use this for reachability checks; a node uses
/// it against its own derived hostname to prove self-reachability before
/// founding.
#[get("/health")]
async fn health() -> web::Json<PeerHealth> {
    web::Json(PeerHealth {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_health_responds_ok() {
        let app = test::init_service(App::new().service(health)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let body: PeerHealth = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.status, "ok");
        assert!(body.timestamp > 0);
    }
}
