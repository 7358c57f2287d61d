//! pindrop command line client
//!
//! This client:
//! 1. Seals a message or file behind a 6-digit pin (create)
//! 2. Claims a secret with its id and pin (reveal)
//!
//! The server only ever sees pake messages and ciphertext.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pindrop::{Client, HttpTransport, Pin, RevealResult, SecretId, SecretPayload};
use tracing::info;

#[derive(Parser)]
#[command(name = "pindrop")]
#[command(about = "Pin-protected one-time secret exchange")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server URL
    #[arg(long, default_value = "http://localhost:8080")]
    server: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Seal a message or file behind a pin
    Create {
        /// Message text to send
        #[arg(long, conflicts_with = "file")]
        message: Option<String>,

        /// File to send
        #[arg(long)]
        file: Option<PathBuf>,

        /// 6-digit pin the receiver must enter
        #[arg(long)]
        pin: String,

        /// Minutes until the unclaimed secret expires (server default if omitted)
        #[arg(long)]
        ttl_minutes: Option<u32>,
    },

    /// Claim a secret with its id and pin
    Reveal {
        /// Secret id from the sender
        #[arg(long)]
        secret_id: String,

        /// 6-digit pin
        #[arg(long)]
        pin: String,

        /// Write the payload here instead of its original name / stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pindrop_cli=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Create {
            message,
            file,
            pin,
            ttl_minutes,
        } => {
            handle_create(&cli.server, message, file, &pin, ttl_minutes).await?;
        }
        Commands::Reveal {
            secret_id,
            pin,
            out,
        } => {
            handle_reveal(&cli.server, secret_id, &pin, out).await?;
        }
    }

    Ok(())
}

async fn handle_create(
    server: &str,
    message: Option<String>,
    file: Option<PathBuf>,
    pin: &str,
    ttl_minutes: Option<u32>,
) -> anyhow::Result<()> {
    let pin = Pin::parse(pin)?;

    let payload = match (message, file) {
        (Some(text), None) => SecretPayload::Text(text),
        (None, Some(path)) => {
            let bytes = std::fs::read(&path)?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("file")
                .to_owned();
            info!("read {} ({} bytes)", name, bytes.len());
            SecretPayload::File { name, bytes }
        }
        _ => anyhow::bail!("provide exactly one of --message or --file"),
    };

    let client = Client::new(HttpTransport::new(server));
    let created = client.create(&pin, &payload, ttl_minutes).await?;

    println!("✓ secret stored as {}", created.sealed_name);
    println!("  id:      {}", created.secret_id);
    println!("  expires: in {} minutes", created.expires_in_minutes);
    println!("  share the id and the pin over different channels");

    Ok(())
}

async fn handle_reveal(
    server: &str,
    secret_id: String,
    pin: &str,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let pin = Pin::parse(pin)?;

    let client = Client::new(HttpTransport::new(server));
    let result = client.reveal(&SecretId::from(secret_id), &pin).await?;

    match result {
        RevealResult::Text(text) => match out {
            Some(path) => {
                std::fs::write(&path, text.as_bytes())?;
                println!("✓ wrote {} ({} bytes)", path.display(), text.len());
            }
            None => println!("{}", text),
        },
        RevealResult::File { name, bytes } => {
            let path = out.unwrap_or_else(|| PathBuf::from(&name));
            std::fs::write(&path, &bytes)?;
            println!("✓ wrote {} ({} bytes)", path.display(), bytes.len());
        }
    }

    Ok(())
}
