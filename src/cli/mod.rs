//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "cohortix",
    version,
    about = "Semantic cohort search over synthetic patient records",
    long_about = "Cohortix embeds free-text patient summaries, persists the vectors next to \
                  their source text, and serves hybrid queries that combine attribute filters \
                  (gender, age bucket, condition, visit recency) with vector-similarity ranking."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/cohortix/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Embed and persist a record file (JSON array of patient records)
    Ingest {
        /// Path to the records file
        file: PathBuf,

        /// Profile to use (e.g., "remote", "fast")
        #[arg(short, long)]
        profile: Option<String>,

        /// Print the ingestion report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a fused attribute-filter + similarity search
    Search {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show store statistics
    Stats,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
