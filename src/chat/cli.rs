// CLI commands for the chat relay

use crate::chat::config::{ChatConfig, StoreBackend};
use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Longest accepted retention horizon, one year
pub const MAX_HORIZON_MINUTES: u64 = 365 * 24 * 60;

/// Chat relay CLI
#[derive(Debug, Parser)]
#[command(name = "fadechat")]
#[command(about = "Multi-client chat relay whose history fades after a fixed horizon")]
pub struct ChatCli {
    #[command(subcommand)]
    pub command: ChatCommand,
}

/// Relay subcommands
#[derive(Debug, Subcommand)]
pub enum ChatCommand {
    /// Run the relay
    Serve(ServeArgs),

    /// Send one message and wait for the relay to broadcast it back
    Send {
        /// Message text
        message: String,

        /// Display name to send as
        #[arg(short, long, env = "FADECHAT_USER")]
        user: String,

        /// Relay address
        #[arg(short, long, env = "FADECHAT_SERVER", default_value = "127.0.0.1:3000")]
        server: SocketAddr,

        /// Seconds to wait for the broadcast confirmation
        #[arg(long, default_value = "5")]
        timeout: u64,
    },

    /// Print history, then follow new messages until Ctrl+C
    Listen {
        /// Relay address
        #[arg(short, long, env = "FADECHAT_SERVER", default_value = "127.0.0.1:3000")]
        server: SocketAddr,

        /// Skip the history replay
        #[arg(long)]
        no_history: bool,
    },

    /// Delete every stored message
    Clear {
        /// Admin API address
        #[arg(short, long, env = "FADECHAT_ADMIN", default_value = "127.0.0.1:3001")]
        admin: SocketAddr,
    },

    /// Show message and connection counts
    Status {
        /// Admin API address
        #[arg(short, long, env = "FADECHAT_ADMIN", default_value = "127.0.0.1:3001")]
        admin: SocketAddr,
    },
}

/// Options for `serve`
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// TCP address for chat connections
    #[arg(short, long, env = "FADECHAT_LISTEN", default_value = "127.0.0.1:3000")]
    pub listen: SocketAddr,

    /// Also accept chat connections on this Unix socket
    #[arg(long, env = "FADECHAT_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Admin API address
    #[arg(long, env = "FADECHAT_ADMIN", default_value = "127.0.0.1:3001")]
    pub admin: SocketAddr,

    /// Do not start the admin API
    #[arg(long)]
    pub no_admin: bool,

    /// SQLite database file (in-memory store when omitted)
    #[arg(long, env = "FADECHAT_DB")]
    pub db: Option<PathBuf>,

    /// Message retention in minutes (default: 60)
    #[arg(
        long,
        env = "FADECHAT_HORIZON_MINUTES",
        default_value = "60",
        value_parser = clap::value_parser!(u64).range(1..=MAX_HORIZON_MINUTES)
    )]
    pub horizon_minutes: u64,

    /// Background sweep period in seconds, 0 to sweep only on connect
    #[arg(long, env = "FADECHAT_SWEEP_SECS", default_value = "300")]
    pub sweep_secs: u64,

    /// Per-connection delivery timeout in milliseconds
    #[arg(long, default_value = "5000")]
    pub delivery_timeout_ms: u64,

    /// Outbound queue length per connection
    #[arg(long, default_value = "64", value_parser = clap::value_parser!(u64).range(1..))]
    pub outbound_buffer: u64,
}

impl ServeArgs {
    pub fn into_config(self) -> ChatConfig {
        ChatConfig {
            listen: self.listen,
            socket_path: self.socket,
            admin: (!self.no_admin).then_some(self.admin),
            store: match self.db {
                Some(path) => StoreBackend::Sqlite(path),
                None => StoreBackend::Memory,
            },
            horizon: Duration::from_secs(self.horizon_minutes.saturating_mul(60)),
            sweep_interval: (self.sweep_secs > 0).then(|| Duration::from_secs(self.sweep_secs)),
            delivery_timeout: Duration::from_millis(self.delivery_timeout_ms),
            outbound_buffer: self.outbound_buffer as usize,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_defaults() {
        let cli = ChatCli::try_parse_from(["fadechat", "serve"]).unwrap();

        let ChatCommand::Serve(args) = cli.command else {
            panic!("Wrong command parsed");
        };
        let config = args.into_config();

        assert_eq!(config.horizon, Duration::from_secs(3600));
        assert_eq!(config.sweep_interval, Some(Duration::from_secs(300)));
        assert_eq!(config.store, StoreBackend::Memory);
        assert!(config.admin.is_some());
    }

    #[test]
    fn test_serve_overrides() {
        let cli = ChatCli::try_parse_from([
            "fadechat",
            "serve",
            "--listen",
            "0.0.0.0:4000",
            "--db",
            "/tmp/chat.db",
            "--horizon-minutes",
            "10",
            "--sweep-secs",
            "0",
            "--no-admin",
        ])
        .unwrap();

        let ChatCommand::Serve(args) = cli.command else {
            panic!("Wrong command parsed");
        };
        let config = args.into_config();

        assert_eq!(config.listen.port(), 4000);
        assert_eq!(config.store, StoreBackend::Sqlite(PathBuf::from("/tmp/chat.db")));
        assert_eq!(config.horizon, Duration::from_secs(600));
        assert_eq!(config.sweep_interval, None);
        assert_eq!(config.admin, None);
    }

    #[test]
    fn test_send_requires_user() {
        assert!(ChatCli::try_parse_from(["fadechat", "send", "hi"]).is_err());

        let cli = ChatCli::try_parse_from(["fadechat", "send", "hi", "--user", "alice"]).unwrap();
        match cli.command {
            ChatCommand::Send { message, user, .. } => {
                assert_eq!(message, "hi");
                assert_eq!(user, "alice");
            }
            _ => panic!("Wrong command parsed"),
        }
    }

    #[test]
    fn test_zero_outbound_buffer_rejected() {
        assert!(ChatCli::try_parse_from(["fadechat", "serve", "--outbound-buffer", "0"]).is_err());
    }

    #[test]
    fn test_horizon_out_of_range_rejected() {
        for minutes in ["0", "525601", "18446744073709551615"] {
            assert!(
                ChatCli::try_parse_from(["fadechat", "serve", "--horizon-minutes", minutes]).is_err(),
                "accepted --horizon-minutes {minutes}"
            );
        }

        let cli = ChatCli::try_parse_from(["fadechat", "serve", "--horizon-minutes", "525600"]).unwrap();
        match cli.command {
            ChatCommand::Serve(args) => {
                assert_eq!(args.into_config().horizon, Duration::from_secs(MAX_HORIZON_MINUTES * 60));
            }
            _ => panic!("Wrong command parsed"),
        }
    }

    #[test]
    fn test_huge_horizon_saturates() {
        let mut args = match ChatCli::try_parse_from(["fadechat", "serve"]).unwrap().command {
            ChatCommand::Serve(args) => args,
            _ => panic!("Wrong command parsed"),
        };
        args.horizon_minutes = u64::MAX;

        assert_eq!(args.into_config().horizon, Duration::from_secs(u64::MAX));
    }
}
