//! Operational surface: `/health` and `/metrics` as plain Rocket HTTP routes. The
//! WebSocket upgrade endpoint is the one route that actually belongs to the messaging
//! core (C10's accept point).

use std::sync::Arc;
use std::time::Instant;

use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::Json;
use rocket::{get, State};
use serde_json::{json, Value};

use crate::cache::Cache;
use crate::circuit_breaker::CircuitBreaker;
use crate::connection_hub::ConnectionHub;
use crate::store::DurableStore;

pub struct StartedAt(pub Instant);

pub struct RemoteAddr(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RemoteAddr {
    type Error = std::convert::Infallible;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let addr = req
            .client_ip()
            .map(|ip| ip.to_string())
            .or_else(|| req.remote().map(|a| a.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(RemoteAddr(addr))
    }
}

/// `GET /health`: liveness, uptime, and a degraded-if-breaker-open flag. The bus
/// and the durable store share the same circuit breaker instance in single-store
/// deployments, so `breaker.is_open()` doubles as "is the store degraded" too.
#[get("/health")]
pub fn health(started_at: &State<StartedAt>, breaker: &State<Arc<CircuitBreaker>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptimeSeconds": started_at.0.elapsed().as_secs(),
        "degraded": breaker.is_open(),
    }))
}

/// `GET /metrics`: counters for connections, rooms, messages, cache performance, and
/// breaker health. Per-type request rates, error rate, and process memory are left to
/// an external load harness.
#[get("/metrics")]
pub fn metrics(
    hub: &State<Arc<ConnectionHub>>,
    cache: &State<Arc<Cache>>,
    breaker: &State<Arc<CircuitBreaker>>,
    store: &State<Arc<dyn DurableStore>>,
) -> Json<Value> {
    let cache_stats = cache.stats();
    let (active_rooms, total_messages) = store.global_counts().unwrap_or((0, 0));
    Json(json!({
        "connections": hub.connection_count(),
        "rooms": active_rooms,
        "messages": total_messages,
        "cache": {
            "hits": cache_stats.hits,
            "misses": cache_stats.misses,
            "sets": cache_stats.sets,
            "invalidations": cache_stats.invalidations,
            "warmups": cache_stats.warmups,
            "hitRate": cache_stats.hit_rate(),
        },
        "circuitBreaker": breaker.report(),
    }))
}

/// Wire protocol max frame size (spec §6): a frame above this makes the socket
/// protocol-unusable, so tungstenite errors the read instead of yielding an oversized
/// message — the read loop's `Err` arm then closes the connection (spec §7: a socket
/// is closed only on protocol-unusable conditions, never on a per-message error).
const MAX_FRAME_BYTES: usize = 64 * 1024;

/// `GET /ws`: the wire protocol's transport. Every connection's lifetime is owned end
/// to end by `ConnectionHub::handle_connection` (C10).
#[get("/ws")]
pub fn ws_connect(
    ws: rocket_ws::WebSocket,
    hub: &State<Arc<ConnectionHub>>,
    remote: RemoteAddr,
) -> rocket_ws::Channel<'static> {
    let hub = Arc::clone(hub.inner());
    ws.config(rocket_ws::Config {
        max_frame_size: Some(MAX_FRAME_BYTES),
        max_message_size: Some(MAX_FRAME_BYTES),
        ..Default::default()
    })
    .channel(move |stream| {
        Box::pin(async move {
            hub.handle_connection(stream, remote.0).await;
            Ok(())
        })
    })
}

#[rocket::catch(404)]
pub fn not_found() -> Json<Value> {
    Json(json!({"error": "not found"}))
}
