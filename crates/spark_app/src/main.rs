//! `spark`: command-line front end for the multi-provider gateway.

mod bootstrap;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use spark_ai::{
    ConversationMessage, DispatchFailure, ImageSize, StreamEvent, Vendor, availability,
};
use spark_core::{ENV_FALLBACKS, GatewayConfig, KeyStore, logging};

#[derive(Parser)]
#[command(name = "spark")]
#[command(version, about = "One interface for several AI providers", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the configuration file (defaults to ~/.spark/config.json)
    #[arg(short, long, global = true, env = "SPARK_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List providers usable with the configured keys
    Providers {
        /// Include providers whose key is missing
        #[arg(long)]
        all: bool,
    },

    /// Send a one-turn conversation to a provider
    Chat {
        /// Provider id, e.g. gpt-4-turbo or claude-3-opus
        #[arg(short, long)]
        provider: String,

        /// System prompt
        #[arg(short, long)]
        system: Option<String>,

        /// Print the answer as it arrives
        #[arg(long)]
        stream: bool,

        /// Message text
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },

    /// Generate an image and print its URL
    Image {
        /// One of 1024x1024, 1024x1792, 1792x1024
        #[arg(long, default_value = "1024x1024")]
        size: String,

        /// Image provider id
        #[arg(short, long, default_value = spark_ai::DEFAULT_IMAGE_PROVIDER)]
        provider: String,

        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },

    /// Manage stored API keys
    Keys {
        #[command(subcommand)]
        command: KeysCommand,
    },
}

#[derive(Subcommand)]
enum KeysCommand {
    /// Store an API key for a vendor
    Set { vendor: Vendor, key: String },
    /// Delete the stored API key for a vendor
    Remove { vendor: Vendor },
    /// Show which vendors have a key
    List,
}

fn load_config(path: Option<&PathBuf>) -> Result<GatewayConfig> {
    match path {
        Some(path) => GatewayConfig::load_from_path(path),
        None => GatewayConfig::load(),
    }
}

fn load_keys(config: &GatewayConfig) -> Result<std::collections::BTreeMap<String, String>> {
    let store = KeyStore::open().context("Failed to open key store")?;
    if config.env_fallback {
        store.load_with_env()
    } else {
        store.load()
    }
}

fn report(failure: &DispatchFailure) {
    eprintln!("error [{}] {}: {}", failure.kind, failure.provider, failure.message);
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    let _guard = logging::init_logging(&config.log_level)?;
    debug!(?config, "configuration loaded");

    match cli.command {
        Commands::Providers { all } => {
            let keys = load_keys(&config)?;
            let gateway = bootstrap::gateway(&config, &keys)?;
            let listed = if all {
                gateway.registry().all().to_vec()
            } else {
                gateway.list_available()
            };
            for d in &listed {
                let ready = if availability::is_available(d, gateway.credentials()) {
                    "ready"
                } else {
                    "no key"
                };
                println!(
                    "{:<16} {:<18} {:<12} {:<10} {}",
                    d.id,
                    d.name,
                    d.vendor.display_name(),
                    format!("{:?}", d.capability).to_lowercase(),
                    ready
                );
            }
            if listed.is_empty() {
                eprintln!("No providers available. Add a key with `spark keys set <vendor> <key>`.");
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Chat {
            provider,
            system,
            stream,
            message,
        } => {
            let keys = load_keys(&config)?;
            let gateway = bootstrap::gateway(&config, &keys)?;
            let conversation = vec![ConversationMessage::user(message.join(" "))];

            if !stream {
                return match gateway
                    .dispatch(&provider, &conversation, system.as_deref())
                    .await
                {
                    Ok(completion) => {
                        println!("{}", completion.content);
                        info!(
                            provider = %completion.provider_id,
                            tokens = completion.tokens_consumed,
                            "chat finished"
                        );
                        Ok(ExitCode::SUCCESS)
                    }
                    Err(failure) => {
                        report(&failure);
                        Ok(ExitCode::FAILURE)
                    }
                };
            }

            let mut rx = match gateway
                .stream(&provider, &conversation, system.as_deref())
                .await
            {
                Ok(rx) => rx,
                Err(failure) => {
                    report(&failure);
                    return Ok(ExitCode::FAILURE);
                }
            };

            let mut stdout = std::io::stdout();
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::Delta(text) => {
                        stdout.write_all(text.as_bytes())?;
                        stdout.flush()?;
                    }
                    StreamEvent::Finished { tokens_consumed } => {
                        println!();
                        info!(provider = %provider, tokens = tokens_consumed, "stream finished");
                        return Ok(ExitCode::SUCCESS);
                    }
                    StreamEvent::Failed(failure) => {
                        println!();
                        report(&failure);
                        return Ok(ExitCode::FAILURE);
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Image {
            size,
            provider,
            prompt,
        } => {
            let keys = load_keys(&config)?;
            let gateway = bootstrap::gateway(&config, &keys)?;
            match gateway
                .generate_image_with(&provider, &prompt.join(" "), &size)
                .await
            {
                Ok(asset) => {
                    println!("{}", asset.url);
                    Ok(ExitCode::SUCCESS)
                }
                Err(failure) => {
                    report(&failure);
                    if failure.kind == spark_ai::FailureKind::InvalidRequest {
                        let sizes: Vec<&str> = ImageSize::ALL.iter().map(|s| s.as_str()).collect();
                        eprintln!("Supported sizes: {}", sizes.join(", "));
                    }
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Commands::Keys { command } => {
            let store = KeyStore::open().context("Failed to open key store")?;
            match command {
                KeysCommand::Set { vendor, key } => {
                    store.set(vendor.slug(), key.trim())?;
                    println!("Stored key for {}", vendor.display_name());
                }
                KeysCommand::Remove { vendor } => {
                    if store.remove(vendor.slug())? {
                        println!("Removed key for {}", vendor.display_name());
                    } else {
                        println!("No key stored for {}", vendor.display_name());
                    }
                }
                KeysCommand::List => {
                    let stored = store.load()?;
                    for vendor in Vendor::ALL {
                        let from_env = ENV_FALLBACKS
                            .iter()
                            .find(|(slug, _)| *slug == vendor.slug())
                            .is_some_and(|(_, var)| std::env::var(var).is_ok_and(|v| !v.trim().is_empty()));
                        let source = if stored.contains_key(vendor.slug()) {
                            "stored"
                        } else if config.env_fallback && from_env {
                            "environment"
                        } else {
                            "-"
                        };
                        println!("{:<12} {}", vendor.display_name(), source);
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
