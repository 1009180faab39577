//! Command-line argument structure for the `gossip-node` binary.

use clap::{Parser, Subcommand};

/// Standalone Scuttlebutt-style gossip node.
///
/// Binds a UDP socket, runs the anti-entropy gossip protocol against a set
/// of seed peers, and optionally layers a leader-election or key-value-store
/// recipe on top.
#[derive(Parser, Debug)]
#[command(name = "gossip-node", about = "Scuttlebutt-style gossip node", version, propagate_version = true)]
pub struct GossipNodeCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node.
    Run(RunArgs),
    /// Print version information and exit.
    Version,
}

/// Which recipe, if any, to run on top of the raw gossip protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Recipe {
    /// No recipe; just gossip raw attributes set via `--attr`.
    None,
    /// Elect a cluster leader by priority, tie-broken by name hash.
    LeaderElection,
    /// Replicated last-write-wins key-value store.
    KeyValueStore,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Address this node binds to and advertises to peers, e.g. `10.0.0.4:9000`.
    #[arg(long, env = "GOSSIP_BIND")]
    pub bind: String,

    /// Seed peer addresses to gossip against, e.g. `--seed 10.0.0.5:9000 --seed 10.0.0.6:9000`.
    #[arg(long = "seed", env = "GOSSIP_SEEDS", value_delimiter = ',')]
    pub seeds: Vec<String>,

    /// Phi Accrual suspicion threshold. Higher tolerates more jitter before
    /// marking a peer dead.
    #[arg(long, env = "GOSSIP_PHI_THRESHOLD", default_value_t = gossip_core::DEFAULT_PHI_THRESHOLD)]
    pub phi_threshold: f64,

    /// Which recipe to run on top of the raw protocol.
    #[arg(long, value_enum, env = "GOSSIP_RECIPE", default_value = "none")]
    pub recipe: Recipe,

    /// Priority to announce when `--recipe leader-election` is selected.
    #[arg(long, env = "GOSSIP_PRIORITY", default_value_t = 0)]
    pub priority: i64,

    /// Attribute to set locally at startup, `key=value` (repeatable). The
    /// value is parsed as JSON if possible, otherwise kept as a string.
    #[arg(long = "attr", env = "GOSSIP_ATTRS", value_delimiter = ',')]
    pub attrs: Vec<String>,

    /// Default log level when `RUST_LOG` is not set.
    #[arg(long, env = "GOSSIP_LOG_LEVEL", default_value = "gossip_node=info,gossip_core=info")]
    pub log_level: String,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "GOSSIP_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        GossipNodeCli::command().debug_assert();
    }
}
