//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sift",
    version,
    author = "neur0map",
    about = "Hybrid retrieval over a local knowledge base",
    long_about = "sift chunks and embeds documents into a local SQLite store, then answers queries by \
                  fusing vector, full-text and tag search with Reciprocal Rank Fusion. Relative \
                  timeframes such as \"last week\" in a query become date filters."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/sift/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chunk, embed and store files
    Ingest {
        /// Files to ingest; each file is one document keyed by its path
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Tags attached to every ingested document
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Source type recorded on every document (e.g. "note", "code")
        #[arg(short, long)]
        source_type: Option<String>,

        /// Chunk as source code
        #[arg(long)]
        code: bool,
    },

    /// Search the knowledge base
    Search {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short, long)]
        limit: Option<usize>,

        /// Minimum cosine similarity for vector matches
        #[arg(long)]
        threshold: Option<f32>,

        /// "auto" to detect a phrase in the query, "none", a date or an RFC 3339 instant
        #[arg(long, default_value = "auto")]
        timeframe: String,

        /// Tags for the tag branch (defaults to the query terms)
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Run branches one after another
        #[arg(long)]
        sequential: bool,

        /// Do not record this search
        #[arg(long)]
        no_track: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,

        /// Print circuit breaker state after the search
        #[arg(long)]
        breakers: bool,
    },

    /// Show how a file would be chunked
    Chunk {
        file: PathBuf,

        /// Maximum chunk size in characters
        #[arg(long)]
        size: Option<usize>,

        /// Characters shared by consecutive chunks
        #[arg(long)]
        overlap: Option<usize>,

        /// prose, code or paragraphs
        #[arg(long)]
        strategy: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show the timeframe detected in a query
    Timeframe {
        query: String,
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
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

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

    /// Print the configuration file path
    Path,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
