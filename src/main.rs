use clap::Parser;
use screenshot_broker::bootstrap;
use screenshot_broker::cli::{self, Cli, Commands};
use screenshot_broker::config::AppConfig;
use screenshot_broker::error::Result;
use tracing::error;

mod main_runtime;

use main_runtime::{init_logging, init_logging_simple};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::GenSecret { bytes } => {
            println!("{}", cli::gen_secret(*bytes));
        }
        Commands::Serve { memory } => {
            let config = AppConfig::load_from(&cli.config)?;
            init_logging(&config.logging);
            if let Err(e) = bootstrap::serve(config, *memory).await {
                error!("Broker exited with error: {}", e);
                return Err(e);
            }
        }
        Commands::IssueToken {
            peer,
            catalog,
            request,
        } => {
            init_logging_simple();
            let config = AppConfig::load_from(&cli.config)?;
            let token = cli::issue_token(&config, peer, catalog, request).await?;
            println!("{}", token.token);
            eprintln!(
                "token_id={} expires_at={}",
                token.token_id(),
                token
                    .payload
                    .expires_at()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default()
            );
        }
        Commands::InspectToken { token } => {
            init_logging_simple();
            let config = AppConfig::load_from(&cli.config)?;
            print!("{}", cli::inspect_token(&config, token).await?);
        }
    }

    Ok(())
}
