use clap::{Parser, Subcommand};
use rand::RngCore;

use crate::bootstrap::Stores;
use crate::config::AppConfig;
use crate::domain::UploadToken;
use crate::error::{AuthError, BrokerError, Result};
use crate::signing::TokenAuthority;

#[derive(Parser)]
#[command(name = "screenshot-broker")]
#[command(version = "0.1.0")]
#[command(about = "Brokers screenshot requests between catalog services and peers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory
    #[arg(short, long, default_value = "config", global = true)]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the broker: upload API, event consumer and expiry sweeper
    Serve {
        /// Use in-memory stores whatever the config says
        #[arg(long)]
        memory: bool,
    },
    /// Mint an upload token and register it against its request
    IssueToken {
        #[arg(long)]
        peer: String,
        #[arg(long)]
        catalog: String,
        #[arg(long)]
        request: String,
    },
    /// Decode a token and report whether it would be accepted
    InspectToken {
        token: String,
    },
    /// Print a random hex secret suitable for token.secret
    GenSecret {
        /// Secret length in bytes
        #[arg(long, default_value = "32")]
        bytes: usize,
    },
}

pub fn gen_secret(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes.max(16)];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

async fn authority(config: &AppConfig) -> Result<TokenAuthority> {
    let stores = Stores::from_config(config, false).await?;
    TokenAuthority::from_config(&config.token, stores.tokens)
}

/// Mint and track a token, as an invite would
pub async fn issue_token(
    config: &AppConfig,
    peer_id: &str,
    catalog_id: &str,
    request_id: &str,
) -> Result<UploadToken> {
    let tokens = authority(config).await?;
    let token = tokens.issue(peer_id, catalog_id, request_id)?;
    tokens.track(&token).await?;
    Ok(token)
}

/// Human-readable report on a token
pub async fn inspect_token(config: &AppConfig, token: &str) -> Result<String> {
    let Some(payload) = TokenAuthority::peek_payload(token) else {
        return Ok("Token could not be decoded".to_string());
    };

    let tokens = authority(config).await?;
    let verdict = match tokens.validate(token).await {
        Ok(_) => "valid".to_string(),
        Err(BrokerError::Auth(AuthError::Blacklisted(reason))) => format!("revoked ({reason})"),
        Err(BrokerError::Auth(e)) => format!("rejected ({e})"),
        Err(e) => return Err(e),
    };
    let winner = tokens
        .winner_of(&payload.catalog_id, &payload.request_id)
        .await?
        .unwrap_or_else(|| "-".to_string());

    let mut out = String::new();
    out.push_str(&format!("token_id:   {}\n", payload.token_id));
    out.push_str(&format!("peer_id:    {}\n", payload.peer_id));
    out.push_str(&format!("catalog_id: {}\n", payload.catalog_id));
    out.push_str(&format!("request_id: {}\n", payload.request_id));
    match payload.expires_at() {
        Some(exp) => out.push_str(&format!("expires_at: {}\n", exp.to_rfc3339())),
        None => out.push_str(&format!("expires_at: invalid ({})\n", payload.exp)),
    }
    out.push_str(&format!("verdict:    {verdict}\n"));
    out.push_str(&format!("winner:     {winner}\n"));
    Ok(out)
}
