use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate api docs in markdown format
    #[cfg(feature = "markdown-docs")]
    #[clap(hide = true)]
    MarkdownDocs {},

    /// Start keycluster as a service.
    Daemon {
        /// Address to listen on (overrides daemon.listen)
        #[clap(short, long)]
        listen: Option<String>,

        /// Load the text encoder before accepting requests
        #[clap(long, default_value = "false")]
        preload: bool,
    },

    /// Group keys into clusters of near-synonyms and print them as json.
    ///
    /// Keys are taken from the arguments, from the header row of --csv,
    /// or one per line from stdin.
    /// Uses the daemon at KEYCLUSTER_ADDR when it is set.
    Cluster {
        /// Keys to cluster
        keys: Vec<String>,

        /// Cluster the header row of a delimited file
        #[clap(long, conflicts_with = "keys")]
        csv: Option<PathBuf>,

        /// Field delimiter of --csv
        #[clap(short, long, default_value = ";")]
        delimiter: char,

        /// Maximum average cosine distance at which clusters merge [0.0, 1.0]
        #[clap(short, long)]
        threshold: Option<f32>,

        /// Print single-key clusters instead of failing when the daemon
        /// is unreachable
        #[clap(long, default_value = "false")]
        fallback: bool,
    },

    /// Query the health of the daemon at KEYCLUSTER_ADDR
    Health {},
}
