//! Basic usage of the kvwire client
//!
//! Needs a server at `REDIS_URL` (default `redis://localhost:6379`).
//! Run with `RUST_LOG=kvwire=debug` to see connection events.

use kvwire::commands::{GeoSearchCommand, GeoUnit, ListDirection};
use kvwire::{cmd, Client, ConnectionConfig, ProtocolVersion};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    let config = ConnectionConfig::new(url)
        .with_protocol_version(ProtocolVersion::Resp3)
        .with_client_name("kvwire-demo");

    println!("Connecting...");
    let client = Client::connect(config).await?;
    println!("Connected: {}", client.state());

    // Lists
    client.del(["demo:queue", "demo:done"]).await?;
    client.rpush("demo:queue", ["job-1", "job-2", "job-3"]).await?;
    if let Some((list, jobs)) = client
        .lmpop(["demo:queue"], ListDirection::Left, Some(2))
        .await?
    {
        println!("Popped {:?} from {}", jobs, list);
    }
    let moved = client
        .lmove("demo:queue", "demo:done", ListDirection::Left, ListDirection::Right)
        .await?;
    println!("Moved: {:?}", moved);

    // Geo
    client.del(["demo:places"]).await?;
    client
        .geoadd(
            "demo:places",
            [
                (13.361_389, 38.115_556, "Palermo"),
                (15.087_269, 37.502_669, "Catania"),
            ],
        )
        .await?;
    let search =
        GeoSearchCommand::from_lonlat("demo:places", 15.0, 37.0, 200.0, GeoUnit::Kilometers)
            .with_dist()
            .with_coord()
            .sort_ascending(true);
    for m in client.geosearch(search).await? {
        println!(
            "{}: {:.2} km at {:?}",
            m.member,
            m.distance.unwrap_or_default(),
            m.coordinates
        );
    }

    // Raw commands
    let pong: String = client.query(cmd("PING")).await?;
    println!("PING -> {}", pong);

    client.del(["demo:queue", "demo:done", "demo:places"]).await?;
    client.close().await?;
    Ok(())
}
