//! edge-server
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌───────────────────────────────────────────────────────┐
//!                      │                      EDGE SERVER                      │
//!                      │                                                       │
//!   HTTPS (tls fd)     │  ┌──────────┐   ┌──────────┐   ┌───────────────────┐  │
//!   ───────────────────┼─▶│ net::tls │──▶│   http   │──▶│ routing (vhosts)  │  │
//!                      │  │ SNI/ACME │   │  server  │   └────┬─────────┬────┘  │
//!                      │  └────┬─────┘   └──────────┘        │         │       │
//!                      │       ▼                             ▼         ▼       │
//!                      │  ┌──────────┐              ┌───────────┐ ┌─────────┐  │
//!                      │  │   acme   │              │   proxy   │ │services │  │
//!                      │  │ provider │              │  /tunnel  │ │ version │  │
//!                      │  └──────────┘              └─────┬─────┘ │ redirect│  │
//!                      │                                  │       │ go-get  │  │
//!   HTTP (plain fd)    │  ┌──────────┐                    ▼       └─────────┘  │
//!   ───────────────────┼─▶│ redirect │──▶ 308       backend (http)              │
//!                      │  └──────────┘                                         │
//!                      └───────────────────────────────────────────────────────┘
//! ```
//!
//! Without inherited sockets a single plaintext listener serves the
//! application directly.

use clap::Parser;

use edge_server::cli::Cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    edge_server::lifecycle::run(config).await?;
    Ok(())
}
