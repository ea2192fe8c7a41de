//! Seed broker syntax.
//!
//! Accepted entry forms, also combinable in a single comma-separated
//! string:
//!
//! - `host:port`
//! - `host` (port defaults to 9092)
//! - `scheme://host[:port]` — the scheme is informational only
//!
//! ```
//! use milena::cluster::seeds::parse_seed_brokers;
//!
//! let seeds = parse_seed_brokers(&["kafka://a:9092,b".to_string()]).unwrap();
//! assert_eq!(seeds.len(), 2);
//! ```

use crate::constants::DEFAULT_PORT;
use crate::error::{Error, Result};

/// One bootstrap address used for metadata discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeedBroker {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for SeedBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Parse the configured seed entries, splitting comma-separated values.
pub fn parse_seed_brokers(entries: &[String]) -> Result<Vec<SeedBroker>> {
    let mut seeds = Vec::new();
    for entry in entries {
        for part in entry.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            seeds.push(parse_entry(part)?);
        }
    }

    if seeds.is_empty() {
        return Err(Error::Config(
            "no seed brokers found in configuration".to_string(),
        ));
    }
    Ok(seeds)
}

fn parse_entry(entry: &str) -> Result<SeedBroker> {
    // the scheme carries no meaning; strip it
    let rest = match entry.find("://") {
        Some(idx) => &entry[idx + 3..],
        None => entry,
    };

    if rest.is_empty() {
        return Err(Error::Config(format!("empty seed broker entry {entry:?}")));
    }

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port_str)) => {
            let port = port_str.parse::<u16>().map_err(|_| {
                Error::Config(format!("invalid port {port_str:?} in seed broker {entry:?}"))
            })?;
            (host, port)
        }
        None => (rest, DEFAULT_PORT),
    };

    if host.is_empty() {
        return Err(Error::Config(format!(
            "missing host in seed broker {entry:?}"
        )));
    }

    Ok(SeedBroker {
        host: host.to_string(),
        port,
    })
}
