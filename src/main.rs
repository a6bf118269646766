//! Lectern CLI entry point.

use anyhow::Result;
use clap::Parser;
use lectern::cli::{commands, Cli, Commands};
use lectern::config::Settings;
use lectern::query::QueryOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli
        .config
        .as_deref()
        .map(Settings::expand_path)
        .unwrap_or_else(Settings::default_config_path);
    let settings = Settings::load_from(Some(&config_path))?;

    // Initialize logging
    let log_level = settings.log_level(cli.verbose);

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("lectern={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Ensure data directory exists
    std::fs::create_dir_all(settings.data_dir())?;

    // Execute command
    match cli.command {
        Commands::Init => {
            commands::run_init(&settings, &config_path)?;
        }

        Commands::Doctor => {
            commands::run_doctor(&settings, &config_path).await?;
        }

        Commands::Ingest {
            transcript,
            manifest,
            chapter,
            title,
            url,
            id,
        } => match (manifest, transcript) {
            (Some(manifest), _) => {
                commands::run_ingest_manifest(&manifest, settings).await?;
            }
            (None, Some(transcript)) => {
                let video = commands::VideoArgs {
                    chapter: chapter.unwrap_or_default(),
                    title: title.unwrap_or_default(),
                    url: url.unwrap_or_default(),
                    id,
                };
                commands::run_ingest(&transcript, video, settings).await?;
            }
            (None, None) => anyhow::bail!("Provide a transcript file or --manifest"),
        },

        Commands::Search {
            query,
            chapters,
            limit,
            no_bm25,
            no_rerank,
            json,
        } => {
            let options = QueryOptions {
                chapters,
                use_bm25: no_bm25.then_some(false),
                rerank: no_rerank.then_some(false),
                limit,
            };
            commands::run_search(&query, options, json, settings).await?;
        }

        Commands::List => {
            commands::run_list(settings).await?;
        }

        Commands::Remove { video_id } => {
            commands::run_remove(&video_id, settings).await?;
        }

        Commands::Recontext { video_id } => {
            commands::run_recontext(&video_id, settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(&action, settings, config_path)?;
        }
    }

    Ok(())
}
