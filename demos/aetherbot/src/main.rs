//! Aetherbot
//!
//! A chatbot wired from `aether.toml`: every adapter type is registered, so
//! the config decides which providers and platforms are live.
//!
//! # Usage
//!
//! ```bash
//! # Run until Ctrl+C, answering platform messages
//! cargo run --package aetherbot -- run
//!
//! # One-shot prompt, streamed to stdout
//! cargo run --package aetherbot -- chat "Tell me a joke"
//!
//! # Same, printed as raw `data:` frames
//! cargo run --package aetherbot -- chat --frames "/ping"
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use aether::adapters::{
    anthropic::AnthropicProvider, discord::DiscordPlatform, gemini::GeminiProvider,
    openai::OpenAiProvider, telegram::TelegramPlatform,
};
use aether::core::InboundMessage;
use aether::prelude::*;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncWriteExt, stdout};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "aetherbot", version, about = "A multi-platform chatbot")]
struct Cli {
    /// Configuration file (defaults to ./aether.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. "development"
    #[arg(short, long, global = true, env = "AETHER_PROFILE")]
    profile: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Connect platforms and run until Ctrl+C or SIGTERM
    Run,

    /// Send one prompt and stream the reply
    Chat {
        prompt: String,

        /// Provider name (defaults to the configured default)
        #[arg(long)]
        provider: Option<String>,

        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        system: Option<String>,

        /// Print wire frames instead of text
        #[arg(long)]
        frames: bool,
    },
}

// ============================================================================
// Plugins
// ============================================================================

/// Logs inbound traffic and failed turns.
struct Journal;

impl Plugin for Journal {
    fn subscriptions(self: Arc<Self>) -> Vec<Subscription> {
        vec![
            Subscription::on(topics::INBOUND_MESSAGE, |event| async move {
                let message: InboundMessage = event.payload_as()?;
                info!(
                    platform = %message.platform,
                    chat = %message.chat_id,
                    sender = message.sender_name.as_deref().unwrap_or(&message.sender_id),
                    "{}",
                    message.text
                );
                Ok(())
            }),
            Subscription::on(topics::RESPONSE_FAILED, |event| async move {
                warn!(payload = %event.payload(), "Chat turn failed");
                Ok(())
            }),
        ]
    }
}

fn journal() -> PluginDescriptor {
    PluginDescriptor::new(
        "journal",
        PluginMetadata::new(env!("CARGO_PKG_VERSION")).description("Logs chat traffic"),
        || Arc::new(Journal),
    )
}

submit_plugin!(JOURNAL_PLUGIN = journal);

// ============================================================================
// Main Entry Point
// ============================================================================

fn build_runtime(cli: &Cli) -> Result<AetherRuntime> {
    let mut builder = AetherRuntime::builder().with_user_config_dir();
    if let Some(path) = &cli.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &cli.profile {
        builder = builder.profile(profile);
    }
    let runtime = builder.build().context("failed to load configuration")?;

    runtime.register_provider_type::<OpenAiProvider>();
    runtime.register_provider_type::<AnthropicProvider>();
    runtime.register_provider_type::<GeminiProvider>();
    runtime.register_platform_type::<TelegramPlatform>();
    runtime.register_platform_type::<DiscordPlatform>();
    Ok(runtime)
}

async fn chat(runtime: &AetherRuntime, request: ChatRequest, frames: bool) -> Result<()> {
    runtime.init().await?;
    runtime.plugins().load_all().await;

    let control = runtime.control();
    let mut out = stdout();
    let mut failure = None;

    if frames {
        let mut frames = control.chat_frames(request);
        while let Some(frame) = frames.next().await {
            out.write_all(frame.as_bytes()).await?;
            out.flush().await?;
        }
    } else {
        let mut chunks = control.chat_stream(request);
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Chunk::Text(text) => {
                    out.write_all(text.as_bytes()).await?;
                    out.flush().await?;
                }
                Chunk::Done(_) => out.write_all(b"\n").await?,
                Chunk::Error(err) => failure = Some(err),
            }
        }
    }

    runtime.plugins().unload_all().await;
    match failure {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = build_runtime(&cli)?;

    match cli.command {
        Command::Run => runtime.run().await?,
        Command::Chat {
            prompt,
            provider,
            model,
            system,
            frames,
        } => {
            let mut request = ChatRequest::new(prompt).streaming();
            if let Some(provider) = provider {
                request = request.with_provider(provider);
            }
            if let Some(model) = model {
                request = request.with_model(model);
            }
            if let Some(system) = system {
                request = request.with_system_prompt(system);
            }
            chat(&runtime, request, frames).await?;
        }
    }

    Ok(())
}
