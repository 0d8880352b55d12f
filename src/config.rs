//! Runtime configuration
//!
//! The flagless invocation reproduces the stock deployment: UDP port
//! 5060, five workers, a ten-deep inbound queue, thirty-two call slots.

use std::net::SocketAddr;

use clap::Parser;

use crate::error::{SipError, SipResult};
use crate::limits::{MAX_CALLS, QUEUE_CAPACITY, WORKER_COUNT};

#[derive(Parser, Debug, Clone)]
#[command(name = "tinysip", about = "Minimal SIP B2BUA signaling server")]
pub struct Config {
    /// UDP listen address
    #[arg(long, env = "TINYSIP_LISTEN", default_value = "0.0.0.0:5060")]
    pub listen: String,

    /// Address advertised in Via/Contact headers; defaults to the
    /// listen address
    #[arg(long, env = "TINYSIP_ADVERTISED")]
    pub advertised: Option<String>,

    /// Number of worker tasks draining the inbound queue
    #[arg(long, env = "TINYSIP_WORKERS", default_value_t = WORKER_COUNT)]
    pub workers: usize,

    /// Inbound queue capacity
    #[arg(long, env = "TINYSIP_QUEUE", default_value_t = QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Maximum number of concurrent calls
    #[arg(long, env = "TINYSIP_MAX_CALLS", default_value_t = MAX_CALLS)]
    pub max_calls: usize,
}

impl Config {
    pub fn listen_addr(&self) -> SipResult<SocketAddr> {
        self.listen
            .parse()
            .map_err(|_| SipError::parse("invalid listen address", Some(self.listen.clone())))
    }

    /// The address stamped into outbound Via and Contact headers
    pub fn advertised_addr(&self) -> SipResult<SocketAddr> {
        match &self.advertised {
            Some(addr) => addr
                .parse()
                .map_err(|_| SipError::parse("invalid advertised address", Some(addr.clone()))),
            None => self.listen_addr(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_deployment() {
        let cfg = Config::parse_from(["tinysip"]);
        assert_eq!(cfg.listen_addr().unwrap().port(), 5060);
        assert_eq!(cfg.workers, WORKER_COUNT);
        assert_eq!(cfg.queue_capacity, QUEUE_CAPACITY);
        assert_eq!(cfg.max_calls, MAX_CALLS);
        assert_eq!(cfg.advertised_addr().unwrap(), cfg.listen_addr().unwrap());
    }

    #[test]
    fn test_advertised_override() {
        let cfg = Config::parse_from(["tinysip", "--advertised", "203.0.113.9:5060"]);
        assert_eq!(
            cfg.advertised_addr().unwrap(),
            "203.0.113.9:5060".parse().unwrap()
        );
    }

    #[test]
    fn test_bad_listen_address() {
        let cfg = Config::parse_from(["tinysip", "--listen", "not-an-addr"]);
        assert!(cfg.listen_addr().is_err());
    }
}
