use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mediaforge")]
#[command(author, version, about = "Media download and transcoding queue")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process one or more sources (URLs or local files) and exit when done
    Run {
        /// Sources to process
        #[arg(required = true)]
        sources: Vec<String>,

        /// Treat every source as a local file, even if it parses as a URL
        #[arg(long)]
        local: bool,

        /// Target format override (e.g. "mp4", "mp3")
        #[arg(long)]
        format: Option<String>,

        /// Extract audio instead of keeping the full video
        #[arg(long)]
        extract_audio: bool,
    },

    /// Check that the external tools are installed and working
    CheckTools,
}
