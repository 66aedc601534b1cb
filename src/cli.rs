use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use clap::Parser;

use crate::shutdown::ShutdownPolicy;

/// HTTP server that counts its open connections and drains them on
/// SIGINT/SIGTERM.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// The TCP port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Seconds to wait for in-flight connections once a termination
    /// signal arrives. 0 closes every connection right away.
    #[arg(short, long, env = "GRACEFULLY_SHUTDOWN_TIMEOUT", default_value_t = 0)]
    graceful_shutdown_timeout: u64,
}

impl Args {
    pub fn parse() -> Self {
        Self::parse_from(std::env::args_os())
    }
    pub fn bind(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
    pub fn shutdown_policy(&self) -> ShutdownPolicy {
        ShutdownPolicy::from_duration(Duration::from_secs(self.graceful_shutdown_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_everywhere_on_8080_without_grace() {
        let args = Args::try_parse_from(["drain"]).unwrap();
        assert_eq!(args.bind(), SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(args.shutdown_policy(), ShutdownPolicy::Immediate);
    }

    #[test]
    fn positive_timeout_is_a_bounded_policy() {
        let args = Args::try_parse_from([
            "drain",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--graceful-shutdown-timeout",
            "5",
        ])
        .unwrap();
        assert_eq!(args.bind(), SocketAddr::from(([127, 0, 0, 1], 9000)));
        assert_eq!(
            args.shutdown_policy(),
            ShutdownPolicy::Bounded(Duration::from_secs(5))
        );
    }

    #[test]
    fn negative_timeout_is_rejected() {
        assert!(Args::try_parse_from(["drain", "--graceful-shutdown-timeout", "-1"]).is_err());
    }

    #[test]
    fn non_numeric_port_is_rejected() {
        assert!(Args::try_parse_from(["drain", "--port", "http"]).is_err());
    }
}
