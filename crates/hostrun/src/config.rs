//! Command-line configuration for the agent binary.

use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::time::Duration;

use clap::ArgAction;
use clap::Parser;

pub const DEFAULT_PORT: u16 = 32900;
pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// Host introspection agent
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "hostrun")]
#[command(about = "Host introspection agent - serves live type and heap queries over WebSocket")]
#[command(version)]
pub struct Config {
    /// WebSocket server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Command whose output is streamed to clients, one frame per line
    #[arg(long, default_value = "logcat")]
    pub log_command: String,

    /// Command run once before the log command; empty to skip
    #[arg(long, default_value = "logcat -c")]
    pub clear_command: String,

    /// Whether log lines are streamed until a client turns them off
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub stream_logs: bool,

    /// Attempts to bind the port before giving up
    #[arg(long, default_value_t = 5)]
    pub bind_attempts: u32,

    /// Base delay between bind attempts, grows linearly
    #[arg(long, default_value_t = 200)]
    pub bind_backoff_ms: u64,

    /// Outbound frames buffered per connection
    #[arg(long, default_value_t = DEFAULT_QUEUE_DEPTH)]
    pub queue_depth: usize,

    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn bind_backoff(&self) -> Duration {
        Duration::from_millis(self.bind_backoff_ms)
    }

    /// `None` when the log tail is disabled.
    pub fn log_command(&self) -> Option<&str> {
        Some(self.log_command.trim()).filter(|c| !c.is_empty())
    }

    pub fn clear_command(&self) -> Option<&str> {
        Some(self.clear_command.trim()).filter(|c| !c.is_empty())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            log_command: "logcat".to_string(),
            clear_command: "logcat -c".to_string(),
            stream_logs: true,
            bind_attempts: 5,
            bind_backoff_ms: 200,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            log_level: "info".to_string(),
        }
    }
}
