//! authgate CLI - credential tooling
//!
//! Usage:
//!   authgate hash [password]
//!   authgate verify <record> [password]
//!   authgate check <password> --username <name> --email <address>
//!   authgate token issue <user-id>
//!   authgate token inspect <token>
//!
//! Settings come from the same environment variables as the server
//! (`ARGON2_*`, `PASSWORD_MIN_LENGTH`, `COMMON_PASSWORDS_PATH`, `JWT_SECRET`).
//! A password omitted on the command line is read from stdin.

use anyhow::{bail, Context};
use authgate_api::auth::{
    AccessTokenCodec, CommonPasswordSet, PasswordHasher, PasswordInput, PasswordValidator,
    ACCESS_TOKEN_TYPE,
};
use authgate_core::config::AppConfig;
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "authgate")]
#[command(about = "Password hashing, strength checks and access tokens")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hash a password with the configured Argon2id parameters
    Hash {
        /// Password (read from stdin when omitted)
        password: Option<String>,
    },
    /// Check a password against a stored record
    Verify {
        /// Encoded password record
        record: String,
        /// Password (read from stdin when omitted)
        password: Option<String>,
    },
    /// Run the password strength rules
    Check {
        /// Password (read from stdin when omitted)
        password: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    /// Issue or inspect access tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Sign an access token for a user
    Issue {
        user_id: i64,
        /// Validity in seconds (defaults to JWT_ACCESS_EXPIRATION_SECS)
        #[arg(long)]
        ttl: Option<u64>,
        #[arg(long, default_value = ACCESS_TOKEN_TYPE)]
        token_type: String,
    },
    /// Verify a token and print its claims
    Inspect {
        token: String,
        #[arg(long, default_value = ACCESS_TOKEN_TYPE)]
        token_type: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Hash { password } => {
            let password = password_or_stdin(password)?;
            let hasher = PasswordHasher::from_config(&config.password);
            tracing::debug!(params = ?hasher.params(), "Hashing password");
            println!("{}", hasher.hash_blocking(password).await?);
        }
        Commands::Verify { record, password } => {
            let password = password_or_stdin(password)?;
            let hasher = PasswordHasher::from_config(&config.password);
            if !hasher.verify_blocking(record.clone(), password).await? {
                bail!("password does not match");
            }
            println!("ok");
            if hasher.needs_rehash(&record)? {
                println!("record uses outdated parameters and should be rehashed");
            }
        }
        Commands::Check {
            password,
            username,
            email,
        } => {
            let password = password_or_stdin(password)?;
            let common =
                CommonPasswordSet::load(config.password.common_passwords_path.as_deref())?;
            let validator = PasswordValidator::new(Arc::new(common), config.password.min_length);

            let mut input = PasswordInput::new(&password);
            if let Some(username) = username.as_deref() {
                input = input.with_username(username);
            }
            if let Some(email) = email.as_deref() {
                input = input.with_email(email);
            }

            if let Err(violations) = validator.validate(&input) {
                for violation in &violations {
                    eprintln!("- {violation}");
                }
                bail!("{} rule(s) failed", violations.len());
            }
            println!("ok");
        }
        Commands::Token { action } => {
            config.validate().context("Invalid configuration")?;
            let codec = AccessTokenCodec::new(config.auth.jwt_secret.as_bytes());

            match action {
                TokenAction::Issue {
                    user_id,
                    ttl,
                    token_type,
                } => {
                    let ttl = ttl.unwrap_or(config.auth.access_token_ttl_secs);
                    tracing::debug!(user_id, ttl, token_type = %token_type, "Issuing token");
                    let token =
                        codec.issue_with_type(user_id, &token_type, Duration::from_secs(ttl))?;
                    println!("{token}");
                }
                TokenAction::Inspect { token, token_type } => {
                    let claims = codec.verify(&token, &token_type)?;
                    println!("{}", serde_json::to_string_pretty(&claims)?);
                }
            }
        }
    }

    Ok(())
}

fn password_or_stdin(password: Option<String>) -> anyhow::Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("no password given");
    }
    Ok(password)
}
