//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "librag",
    version,
    author = "neur0map",
    about = "Local retrieval engine over a folder of documents",
    long_about = "librag keeps a folder of documents chunked, embedded and indexed in memory, \
                  persists the index as JSON lines, and answers questions with retrieved context \
                  through a local Ollama server."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/librag/config.toml)
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
    /// Load the store, then watch the library and compact on schedule until stopped
    Run,

    /// Ingest one file from the library
    Ingest {
        /// Path relative to the library root
        path: String,
    },

    /// Ingest every matching file in the library
    IngestAll {
        /// Comma separated extensions overriding library.extensions
        #[arg(short, long)]
        ext: Option<String>,
    },

    /// Retrieve the chunks most relevant to a query
    Search {
        /// Search query text
        query: String,

        /// Number of chunks to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Ask a question answered from the library
    Ask {
        /// Question to ask
        question: String,

        /// Number of context chunks to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Reply length: fast, medium, long, xlong or max
        #[arg(short, long)]
        think: Option<String>,

        /// Print the retrieved context before the answer
        #[arg(long)]
        show_context: bool,
    },

    /// Compact the store now
    Save,

    /// Rebuild the in-memory index from the store
    Load {
        /// Keep what is already in memory
        #[arg(long)]
        no_clear: bool,

        #[arg(long)]
        batch_size: Option<usize>,

        #[arg(long)]
        log_every: Option<usize>,
    },

    /// Show index statistics
    Info {
        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Check the Ollama server and the configured models
    Health,

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

    #[test]
    fn parses_search_flags() {
        let cli = Cli::try_parse_from(["librag", "search", "who likes sushi", "-k", "3", "--json"]).unwrap();
        match cli.command {
            Commands::Search { query, top_k, json } => {
                assert_eq!(query, "who likes sushi");
                assert_eq!(top_k, Some(3));
                assert!(json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn parses_ingest_all_override() {
        let cli = Cli::try_parse_from(["librag", "ingest-all", "--ext", "md,txt"]).unwrap();
        assert!(matches!(cli.command, Commands::IngestAll { ext: Some(ref e) } if e == "md,txt"));
    }
}
