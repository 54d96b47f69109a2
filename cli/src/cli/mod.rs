use clap::{Parser, Subcommand};

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Recompute usage on a fixed interval until interrupted
    #[command(alias = "watch")]
    Run {
        /// Seconds between passes (overrides engine.interval_secs)
        #[arg(short, long)]
        interval_secs: Option<u64>,

        /// Write publisher deltas to stdout as JSON lines
        #[arg(short, long)]
        emit: bool,
    },

    /// Run a single pass and print the merged snapshot as JSON
    Once {
        /// Print only this item, with its config and computation time
        #[arg(short, long, conflicts_with = "group")]
        item: Option<String>,

        /// Print only this group's totals
        #[arg(short, long)]
        group: Option<String>,

        #[arg(short, long)]
        compact: bool,
    },

    /// Usage for one configured item over an arbitrary range
    Query {
        /// Item path, e.g. electrical.solar.1.panelPower
        path: String,

        /// Range start (RFC 3339)
        #[arg(long)]
        from: String,

        /// Range end (RFC 3339), defaults to now
        #[arg(long)]
        to: Option<String>,

        /// Aggregation window such as 15m; chosen from the range length when omitted
        #[arg(short, long)]
        aggregation: Option<String>,

        #[arg(short, long)]
        compact: bool,
    },

    /// Show, reset or validate the configuration
    Config {
        /// Print the config file path only
        #[arg(long)]
        path: bool,

        /// Overwrite the config file with defaults
        #[arg(long)]
        reset: bool,

        /// Report configuration problems and exit non-zero if any
        #[arg(long)]
        check: bool,
    },
}

/// Usage statistics for power and tank sensors from stored samples
#[derive(Debug, Parser)]
#[command(name = "usagewatch", version, verbatim_doc_comment)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}
