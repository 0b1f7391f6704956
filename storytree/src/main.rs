//! Command-line driver for branching story generation.
//!
//! ```bash
//! storytree new "a lighthouse keeper's daughter finds a map drawn by the tide" --min 3 --max 6
//! storytree run The_Tide_Map.story.json --until-done
//! storytree tree The_Tide_Map.story.json
//! ```

mod cli;
mod commands;

use cli::Command;
use storytree_services::ServiceSet;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = match cli::parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    if command == Command::Help {
        cli::print_help();
        return Ok(());
    }

    let services = if command.needs_services() {
        if std::env::var("ANTHROPIC_API_KEY").is_err() {
            eprintln!("Error: ANTHROPIC_API_KEY environment variable not set.");
            eprintln!("Please set it in .env file or with: export ANTHROPIC_API_KEY=your_key_here");
            std::process::exit(1);
        }
        Some(ServiceSet::from_env()?)
    } else {
        None
    };

    match (command, services) {
        (Command::New(options), Some(services)) => commands::new_story(services, options).await,
        (
            Command::Run {
                path,
                batch,
                until_done,
            },
            Some(services),
        ) => commands::run_batches(services, path, batch, until_done).await,
        (Command::Status { path }, _) => commands::status(path).await,
        (Command::Tree { path }, _) => commands::tree(path).await,
        _ => {
            cli::print_help();
            Ok(())
        }
    }
}
