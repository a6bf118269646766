//! Init command - interactive first-run setup.

use crate::cli::Output;
use crate::config::Settings;
use crate::openai::is_api_key_configured;
use console::style;
use std::io::{self, Write};
use std::path::Path;

/// Run the init command for first-time setup.
pub fn run_init(settings: &Settings, config_path: &Path) -> anyhow::Result<()> {
    Output::header("Lectern Setup");
    println!();
    println!("Welcome to Lectern! Let's make sure everything is configured correctly.\n");

    // Step 1: Check API key
    println!("{}", style("Step 1: Checking API configuration").bold().cyan());
    println!();

    if !is_api_key_configured() {
        Output::warning("OPENAI_API_KEY environment variable is not set.");
        println!();
        println!("  Lectern uses an OpenAI API key for embeddings and chunk context.");
        println!("  Get your API key from: {}", style("https://platform.openai.com/api-keys").underlined());
        println!();
        println!("  Set it in your shell configuration (~/.bashrc, ~/.zshrc, etc.):");
        println!("  {}", style("export OPENAI_API_KEY='sk-...'").green());
        println!();

        if !prompt_continue("Continue without API key?")? {
            println!();
            Output::info("Setup cancelled. Set your API key and run 'lectern init' again.");
            return Ok(());
        }
    } else {
        Output::success("OpenAI API key is configured!");
    }

    println!();

    // Step 2: Create directories
    println!("{}", style("Step 2: Setting up directories").bold().cyan());
    println!();

    let data_dir = settings.data_dir();
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
        Output::success(&format!("Created data directory: {}", data_dir.display()));
    } else {
        Output::info(&format!("Data directory exists: {}", data_dir.display()));
    }

    println!();

    // Step 3: Create config file
    println!("{}", style("Step 3: Configuration file").bold().cyan());
    println!();

    if config_path.exists() {
        Output::info(&format!("Config file exists: {}", config_path.display()));
    } else if prompt_continue("Create default configuration file?")? {
        settings.save_to(&config_path.to_path_buf())?;
        Output::success(&format!("Created config file: {}", config_path.display()));
        println!();
        println!("  Edit your config with: {}", style("lectern config edit").green());
        println!(
            "  Point {} at your cross-encoder server, or set provider = \"overlap\".",
            style("[rerank]").cyan()
        );
    } else {
        Output::info("Skipped config file creation. Using defaults.");
    }

    println!();

    // Summary
    println!("{}", style("Setup Complete!").bold().green());
    println!();
    println!("Next steps:");
    println!("  {} Check system status", style("lectern doctor").cyan());
    println!(
        "  {} Ingest a lecture transcript",
        style("lectern ingest <transcript.json> --chapter <c> --title <t> --url <u>").cyan()
    );
    println!("  {} Search your lectures", style("lectern search \"<query>\"").cyan());
    println!();
    println!("For more help: {}", style("lectern --help").cyan());

    Ok(())
}

/// Prompt user for yes/no confirmation.
fn prompt_continue(message: &str) -> io::Result<bool> {
    print!("{} {} ", style("?").cyan(), message);
    print!("{} ", style("[y/N]").dim());
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    Ok(is_yes(&input))
}

fn is_yes(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}
