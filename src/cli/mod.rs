//! CLI module for Entity Cache
//!
//! Administrative subcommands run against the configured cache store:
//! - `stats`: counters, entry count and memory usage
//! - `get` / `forget`: inspect or drop a single key
//! - `wipe`: invalidate every key under a tag
//! - `unlock`: release a stuck lock
//! - `flush`: drop everything under the key prefix
//! - `ping`: store liveness

pub mod cache;

use clap::{Parser, Subcommand};

/// Entity Cache - tag-based cache administration
#[derive(Parser)]
#[command(name = "entity-cache")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show cache counters and store usage
    Stats,

    /// Print the value stored under a key
    Get {
        /// Logical key, without the configured prefix
        key: String,
    },

    /// Delete a key
    Forget { key: String },

    /// Delete every key under a tag
    Wipe { tag: String },

    /// Release a lock regardless of its holder
    Unlock { key: String },

    /// Delete everything under the key prefix (the whole store when unprefixed)
    Flush {
        /// Confirm the flush
        #[arg(long)]
        yes: bool,
    },

    /// Check that the store answers
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["entity-cache", "wipe", "user"]).unwrap();
        assert_eq!(cli.command, Command::Wipe { tag: "user".to_string() });

        let cli = Cli::try_parse_from(["entity-cache", "flush", "--yes"]).unwrap();
        assert_eq!(cli.command, Command::Flush { yes: true });

        assert!(Cli::try_parse_from(["entity-cache", "get"]).is_err());
    }
}
