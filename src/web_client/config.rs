//! Configuration types and constants for the weft server.

use std::path::PathBuf;

use clap::Parser;

pub(crate) const WS_CHANNEL_CAPACITY: usize = 256;
pub(crate) const MAX_WS_CONNECTIONS: usize = 1024;
pub(crate) const DEFAULT_LIST_LIMIT: u32 = 50;
pub(crate) const MAX_LIST_LIMIT: u32 = 200;

/// Social connection & presence engine.
///
/// Maintains the follow/friend/block graph, tracks which users are reachable
/// over a live WebSocket session, and delivers deduplicated real-time
/// notifications for graph and interaction events.
///
/// Configuration can be set via CLI arguments or environment variables.
/// CLI arguments take precedence over environment variables.
#[derive(Parser, Debug)]
#[command(name = "weft", version, about)]
pub struct Cli {
    /// HTTP server bind address [env: WEFT_BIND] [default: 127.0.0.1:3000]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Data directory for the database [env: WEFT_HOME] [default: ~/.weft]
    #[arg(long, short = 'd')]
    pub data_dir: Option<PathBuf>,
}

pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn from_cli_and_env(cli: Cli) -> Self {
        let data_dir = cli
            .data_dir
            .or_else(|| std::env::var("WEFT_HOME").ok().map(PathBuf::from))
            .unwrap_or_else(|| {
                std::env::var("HOME")
                    .map(|h| PathBuf::from(h).join(".weft"))
                    .unwrap_or_else(|_| PathBuf::from(".weft"))
            });

        let bind_addr = cli
            .bind
            .or_else(|| std::env::var("WEFT_BIND").ok())
            .unwrap_or_else(|| "127.0.0.1:3000".to_string());

        Self {
            bind_addr,
            data_dir,
        }
    }
}
