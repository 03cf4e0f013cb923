use rocket::http::Status;
use rocket::local::blocking::Client;

use roomcast::config::Config;

fn test_config() -> Config {
    let db_path = format!("/tmp/roomcast_it_{}.db", uuid::Uuid::new_v4());
    Config {
        port: 0,
        database_path: db_path,
        redis_url: None,
        db_pool_size: 5,
        log_level: "info".to_string(),
        node_env: "test".to_string(),
    }
}

fn test_client() -> (Client, String) {
    let config = test_config();
    let db_path = config.database_path.clone();
    let rocket = roomcast::rocket_with_config(config);
    (Client::tracked(rocket).expect("valid rocket instance"), db_path)
}

#[test]
fn health_reports_ok_and_not_degraded() {
    let (client, db_path) = test_client();
    let res = client.get("/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["degraded"], false);
    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn metrics_reports_zero_connections_on_startup() {
    let (client, db_path) = test_client();
    let res = client.get("/metrics").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["connections"], 0);
    assert!(body["cache"].is_object());
    assert_eq!(body["circuitBreaker"]["state"], "closed");
    let _ = std::fs::remove_file(&db_path);
}

#[test]
fn unknown_route_yields_404_catcher() {
    let (client, db_path) = test_client();
    let res = client.get("/does-not-exist").dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let _ = std::fs::remove_file(&db_path);
}
