//! Flarepath Relay Server
//!
//! Accept agent-execution events from producers and serve the timeline,
//! replay, and flight visualization APIs.

use flarepath_vis::{VisServer, VisualizerStore};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let port: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(3000);

    println!("Flarepath Visualizer Relay");
    println!("==========================");
    println!();
    println!("Producers: ws://localhost:{port}/ws?role=producer");
    println!("Viewers:   ws://localhost:{port}/ws?role=viewer");
    println!();

    let server = VisServer::new(VisualizerStore::new());
    server.serve(port).await?;

    Ok(())
}
