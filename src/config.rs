use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use clap::Parser;

/// Babblr, a tiny real-time chat server.
#[derive(Debug, Clone, Parser)]
#[command(name = "babblr", version)]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "BABBLR_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Redis holding messages and sessions. Everything stays in memory
    /// when unset.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// How long a login lasts, e.g. `12h` or `1day`.
    #[arg(long, env = "BABBLR_SESSION_TTL", default_value = "1day", value_parser = humantime::parse_duration)]
    pub session_ttl: Duration,

    /// Number of past messages replayed to a newly connected client.
    #[arg(long, env = "BABBLR_HISTORY", default_value_t = 50)]
    pub history: usize,
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
