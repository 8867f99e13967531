//! Diary CLI - Administrative command-line interface
//!
//! Usage:
//!   diary add-user --username <name> --email <email> --password <password>
//!   diary revoke <token>
//!   diary sweep
//!   diary gen-secret [--bytes <n>]

use anyhow::Context;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use clap::{Parser, Subcommand};
use diary_api::auth::RegisterRequest;
use diary_api::state::AppState;
use diary_core::{AppConfig, SqliteStore};
use rand::{rngs::OsRng, RngCore};

#[derive(Parser)]
#[command(name = "diary")]
#[command(about = "Workout diary administration CLI")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a user account directly in the credential store
    AddUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Blacklist a token until it expires
    Revoke {
        /// Access or refresh token
        token: String,
    },
    /// Remove expired blacklist entries
    Sweep,
    /// Print a random signing secret
    GenSecret {
        /// Number of random bytes
        #[arg(long, default_value_t = 48)]
        bytes: usize,
    },
}

async fn open_state() -> anyhow::Result<AppState> {
    let config = AppConfig::load()?;
    let store = SqliteStore::connect(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("Failed to open {}", config.database.url))?;
    Ok(AppState::new(config, store)?)
}

fn generate_secret(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::AddUser {
            username,
            email,
            password,
        } => {
            let state = open_state().await?;
            let user = state
                .auth
                .register(RegisterRequest {
                    username,
                    email,
                    password,
                })
                .await?;
            println!("Created user {} (id {})", user.username, user.id);
        }
        Commands::Revoke { token } => {
            let state = open_state().await?;
            if state.auth.revoke_token(&token).await? {
                println!("Token revoked");
            } else {
                println!("Token is invalid, expired or already revoked");
            }
        }
        Commands::Sweep => {
            let state = open_state().await?;
            let removed = state.auth.sweep_blacklist().await?;
            println!("Removed {removed} expired blacklist entries");
        }
        Commands::GenSecret { bytes } => {
            anyhow::ensure!(bytes >= 32, "Secrets shorter than 32 bytes are not accepted");
            println!("{}", generate_secret(bytes));
        }
    }

    Ok(())
}
