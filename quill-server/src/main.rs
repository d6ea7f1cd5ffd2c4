//! Quill collaboration server.
//!
//! Reads its settings from `QUILL_*` environment variables and serves
//! the presence-and-broadcast core over WebSocket until interrupted.

use log::{error, info};

use quill_collab::server::{CollabServer, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    info!(
        "Starting collaboration server on {} (origins: {:?}, roster policy: {:?})",
        config.bind_addr, config.allowed_origins, config.roster_policy
    );
    let server = CollabServer::new(config);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            info!(
                "Shutting down ({} connections served, {} rooms open)",
                stats.total_connections, stats.active_rooms
            );
        }
    }
}
