//! CLI module for Lectern.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lectern - hybrid search over lecture transcripts
///
/// Indexes time-stamped lecture transcripts and answers queries with the most
/// relevant excerpts, combining semantic and keyword search.
#[derive(Parser, Debug)]
#[command(name = "lectern")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize Lectern and write a default configuration
    Init,

    /// Check configuration and collaborators
    Doctor,

    /// Ingest a transcript, or every video listed in a manifest
    Ingest {
        /// Transcript JSON file (Whisper-style, with a `segments` array)
        #[arg(required_unless_present = "manifest", conflicts_with = "manifest")]
        transcript: Option<PathBuf>,

        /// TOML manifest listing videos and their transcripts
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        /// Chapter the video belongs to
        #[arg(long, required_unless_present = "manifest")]
        chapter: Option<String>,

        /// Video title
        #[arg(long, required_unless_present = "manifest")]
        title: Option<String>,

        /// Video URL
        #[arg(long, required_unless_present = "manifest")]
        url: Option<String>,

        /// Video ID (derived from chapter and URL when omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Search indexed lectures
    Search {
        /// Search query
        query: String,

        /// Restrict to a chapter (repeatable)
        #[arg(long = "chapter")]
        chapters: Vec<String>,

        /// Maximum number of results
        #[arg(short, long)]
        limit: Option<usize>,

        /// Skip keyword (BM25) search
        #[arg(long)]
        no_bm25: bool,

        /// Skip reranking and keep the fused order
        #[arg(long)]
        no_rerank: bool,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// List ingested videos
    List,

    /// Remove a video and its chunks
    Remove {
        /// Video ID to remove
        video_id: String,
    },

    /// Regenerate chunk context for ingested videos
    Recontext {
        /// Video ID to recontext (use 'all' for every video)
        video_id: String,
    },

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

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
