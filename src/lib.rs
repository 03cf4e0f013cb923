pub mod bus;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod connection_hub;
pub mod housekeeping;
pub mod message_service;
pub mod models;
pub mod protocol;
pub mod rate_limit;
pub mod room_registry;
pub mod router;
pub mod routes;
pub mod store;
pub mod user_registry;
pub mod validator;

use std::sync::Arc;
use std::time::Instant;

use bus::{Bus, InProcessBus, RedisBus};
use cache::{Cache, NoopSharedCache, SharedCache};
use circuit_breaker::CircuitBreaker;
use config::Config;
use connection_hub::ConnectionHub;
use message_service::MessageService;
use rate_limit::{RateLimitConfig, RateLimiter};
use room_registry::RoomRegistry;
use routes::StartedAt;
use store::{DurableStore, SqliteStore};
use user_registry::UserRegistry;

/// Builds the Rocket instance with every managed-state service constructed once at
/// startup — handlers reach them through Rocket's managed state, never a global.
pub fn rocket() -> rocket::Rocket<rocket::Build> {
    rocket_with_config(Config::from_env())
}

pub fn rocket_with_config(config: Config) -> rocket::Rocket<rocket::Build> {
    if let Some(parent) = std::path::Path::new(&config.database_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    println!("🚀 starting roomcast on port {} (env={})", config.port, config.node_env);

    let store: Arc<dyn DurableStore> = Arc::new(SqliteStore::new(&config.database_path));
    let breaker = Arc::new(CircuitBreaker::new());

    let (bus, shared_cache): (Arc<dyn Bus>, Arc<dyn SharedCache>) = match &config.redis_url {
        Some(url) => match RedisBus::new(url, breaker.clone()) {
            Ok(redis_bus) => {
                let redis_bus = Arc::new(redis_bus);
                redis_bus.spawn_forwarder();
                println!("📡 cross-instance bus: redis at {url}");
                (redis_bus as Arc<dyn Bus>, Arc::new(NoopSharedCache) as Arc<dyn SharedCache>)
            }
            Err(err) => {
                eprintln!("⚠️  redis bus unavailable ({err}), falling back to in-process fan-out");
                (Arc::new(InProcessBus::new()), Arc::new(NoopSharedCache) as Arc<dyn SharedCache>)
            }
        },
        None => {
            println!("📡 cross-instance bus: in-process only (no REDIS_URL)");
            (Arc::new(InProcessBus::new()), Arc::new(NoopSharedCache) as Arc<dyn SharedCache>)
        }
    };

    let cache = Arc::new(Cache::new(shared_cache, breaker.clone()));
    let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::from_env()));

    let rooms = Arc::new(RoomRegistry::new(store.clone(), cache.clone(), bus.clone()));
    let users = Arc::new(UserRegistry::new(store.clone(), cache.clone()));
    let messages = Arc::new(MessageService::new(store.clone(), cache.clone(), bus.clone()));
    let hub = Arc::new(ConnectionHub::new(bus.clone(), rooms.clone(), users.clone(), messages.clone(), rate_limiter));
    hub.spawn_global_forwarder();

    warm_cache(&cache, &store);

    let housekeeping_handle = housekeeping::spawn(store.clone());
    let hub_for_shutdown = hub.clone();

    let figment = rocket::Config::figment().merge(("port", config.port));

    rocket::custom(figment)
        .manage(store)
        .manage(bus)
        .manage(cache)
        .manage(breaker)
        .manage(rooms)
        .manage(users)
        .manage(messages)
        .manage(hub)
        .manage(StartedAt(Instant::now()))
        .manage(config)
        .register("/", rocket::catchers![routes::not_found])
        .mount("/", rocket::routes![routes::health, routes::metrics, routes::ws_connect])
        .attach(rocket::fairing::AdHoc::on_shutdown("graceful drain", move |_rocket| {
            Box::pin(async move {
                hub_for_shutdown.drain().await;
                housekeeping_handle.abort();
                println!("👋 roomcast shut down cleanly");
            })
        }))
}

/// Startup cache warm-up: active-room info and the last N messages for the top-K
/// active rooms. Gathering the data needs the store; seeding `Cache` with it is the
/// cache's own job (`Cache::warm`).
fn warm_cache(cache: &Cache, store: &Arc<dyn DurableStore>) {
    let top_rooms = store.find_active_rooms(Cache::warm_top_rooms() as i64).unwrap_or_default();
    let mut entries = Vec::new();

    for room in &top_rooms {
        if let Ok(value) = serde_json::to_value(room) {
            entries.push((format!("room:{}", room.id), value));
        }
        if let Ok(history) = store.history(&room.id, Cache::warm_messages_per_room() as i64, None) {
            if let Ok(value) = serde_json::to_value(&history) {
                entries.push((
                    format!("room:{}:messages:{}", room.id, Cache::warm_messages_per_room()),
                    value,
                ));
            }
        }
    }

    let warmed = entries.len();
    cache.warm(entries);
    if warmed > 0 {
        println!("🔥 cache warmed with {warmed} entries across {} active rooms", top_rooms.len());
    }
}
