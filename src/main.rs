//! Dungeonlink Server
//!
//! Authoritative session server: generates the world from a seed, then
//! relays player and builder events between connected clients until
//! interrupted.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dungeonlink::{
    derive_world_seed, DeterministicRng, DungeonGenerator, GameServer, GeneratorConfig,
    ServerConfig, DEFAULT_PORT, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Dungeonlink Server v{}", VERSION);

    // Seed precedence: explicit DUNGEON_SEED, else a name to derive from
    let seed = match std::env::var("DUNGEON_SEED") {
        Ok(raw) => raw
            .parse::<u64>()
            .with_context(|| format!("DUNGEON_SEED is not a u64: {raw}"))?,
        Err(_) => {
            let name =
                std::env::var("WORLD_NAME").unwrap_or_else(|_| "dungeonlink-default".to_string());
            derive_world_seed(&name)
        }
    };

    let bind_addr = std::env::var("BIND_ADDR")
        .unwrap_or_else(|_| format!("0.0.0.0:{DEFAULT_PORT}"))
        .parse()
        .context("BIND_ADDR is not a socket address")?;

    let max_players = match std::env::var("MAX_PLAYERS") {
        Ok(raw) => raw
            .parse::<usize>()
            .with_context(|| format!("MAX_PLAYERS is not a count: {raw}"))?,
        Err(_) => ServerConfig::default().max_players,
    };

    info!("world seed: {}", seed);
    let mut rng = DeterministicRng::new(seed);
    let dungeon = DungeonGenerator::new(GeneratorConfig::default()).generate(&mut rng);
    info!(
        "generated {}x{} dungeon with {} rooms, spawn at {:?}",
        dungeon.width(),
        dungeon.height(),
        dungeon.rooms().len(),
        dungeon.spawn_point()
    );

    let config = ServerConfig {
        bind_addr,
        max_players,
        ..Default::default()
    };
    let server = GameServer::bind(config, dungeon)
        .await
        .context("failed to start server")?;

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
