mod ecs;
mod game;
mod network;
mod protocol;
mod room;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use room::service::RoomService;
use room::RoomConfig;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("ignoring unparseable {}={:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let bind = std::env::var("ARCADIA_BIND").unwrap_or_else(|_| "127.0.0.1:4242".to_string());
    let config = RoomConfig {
        tick_interval: Duration::from_millis(env_or("ARCADIA_TICK_MS", 480)),
        max_step_height: env_or("ARCADIA_MAX_STEP_HEIGHT", 1.1),
        ..RoomConfig::default()
    };

    let service = Arc::new(RoomService::new(config));
    network::server::run(&bind, service).await;
}
