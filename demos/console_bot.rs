use clap::Parser;
use dotenv::dotenv;
use mc_runner::error::Result;
use mc_runner::{Command, ServerRunner, Settings};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt};

/// Stand-in for the chat front-end: one command per stdin line.
///
/// Secrets come from the environment or a `.env` file (`RCON_PASSWORD`,
/// `CNP_SERVERS_FILE`, `PLAYIT_PATH`).
#[derive(Debug, Parser)]
#[command(name = "console_bot")]
struct Args {
    /// JSON settings file; environment values still override it
    #[arg(long, short)]
    settings: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .init();

    let runner = match args.settings {
        Some(path) => ServerRunner::from_settings_file(path)?,
        None => ServerRunner::new(Settings::from_env()),
    };
    tracing::info!(registry = ?runner.settings().registry_path, "console_bot ready");
    println!("Type a command (e.g. `list`, `start survival`), or `quit`.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read stdin");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }

        match line.parse::<Command>() {
            Ok(command) => {
                // Replies print as they finish; slow commands don't block input.
                let handle = runner.spawn_command(command);
                tokio::spawn(async move {
                    match handle.await {
                        Ok(reply) if reply.success => println!("{}", reply),
                        Ok(reply) => println!("error: {}", reply),
                        Err(e) => tracing::error!(error = %e, "Command task failed"),
                    }
                });
            }
            Err(e) => println!("{}", e),
        }
    }

    for (name, outcome) in runner.shutdown_all().await {
        match outcome {
            Ok(outcome) => println!("{}: {:?}", name, outcome),
            Err(e) => println!("{}: {}", name, e),
        }
    }
    Ok(())
}
