//! Runtime configuration: command line / environment parsing and the plain `Config` it produces.

use std::time::Duration;

use clap::Parser;

use crate::signaling::DEFAULT_MAX_NAME_LEN;

pub const DEFAULT_PORT: u16 = 3000;
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// Duet matchmaking and signaling relay
///
/// Pairs anonymous clients two at a time and relays WebRTC offer/answer/ICE
/// messages between them over WebSocket.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:3000", env = "DUET_BIND")]
    pub bind: String,

    /// Maximum display name length, in characters
    #[arg(long, default_value_t = DEFAULT_MAX_NAME_LEN, env = "DUET_MAX_NAME_LEN")]
    pub max_name_len: usize,

    /// Seconds between keepalive pings
    #[arg(long, default_value_t = 30, env = "DUET_PING_INTERVAL_SECS")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before dropping the connection
    #[arg(long, default_value_t = 10, env = "DUET_PONG_TIMEOUT_SECS")]
    pub pong_timeout_secs: u64,

    /// Capacity of the relay command queue
    #[arg(long, default_value_t = DEFAULT_COMMAND_CAPACITY, env = "DUET_COMMAND_CAPACITY")]
    pub command_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub max_name_len: usize,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub command_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", DEFAULT_PORT),
            max_name_len: DEFAULT_MAX_NAME_LEN,
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            bind: args.bind,
            max_name_len: args.max_name_len,
            ping_interval: Duration::from_secs(args.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(args.pong_timeout_secs.max(1)),
            command_capacity: args.command_capacity.max(1),
        }
    }
}
