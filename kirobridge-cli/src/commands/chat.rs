//! `chat` command: one-shot generation through the pool.

use anyhow::{bail, Result};
use clap::Args;
use futures::StreamExt;

use kirobridge_wire::{AssistantClient, ChatMessage, ChatRole, GenerateOptions};

use super::AppContext;

/// Arguments for the chat command.
#[derive(Args)]
pub struct ChatArgs {
    /// The prompt to send.
    #[arg(required = true, trailing_var_arg = true)]
    pub prompt: Vec<String>,

    /// Model name (resolved through the lookup table).
    #[arg(long, short, default_value = "claude-sonnet-4-20250514")]
    pub model: String,

    /// System prompt, folded into the first user turn.
    #[arg(long)]
    pub system: Option<String>,

    /// Advisory output budget.
    #[arg(long, default_value_t = 4096)]
    pub max_tokens: u32,

    /// Advisory sampling temperature.
    #[arg(long, default_value_t = 0.7)]
    pub temperature: f64,

    /// Consume the streaming surface (whole-response granularity).
    #[arg(long)]
    pub stream: bool,
}

pub async fn run(ctx: &AppContext, args: &ChatArgs) -> Result<()> {
    let Some(credential) = ctx.pool.select().await else {
        bail!("No tokens available in the pool");
    };

    let mut messages = Vec::new();
    if let Some(system) = &args.system {
        messages.push(ChatMessage::new(ChatRole::System, system.clone()));
    }
    messages.push(ChatMessage::new(ChatRole::User, args.prompt.join(" ")));

    let options = GenerateOptions {
        model: args.model.clone(),
        max_tokens: args.max_tokens,
        temperature: args.temperature,
    };

    let client = AssistantClient::from_settings(&ctx.settings);

    if args.stream {
        let stream = client.generate_stream(&messages, &options, &credential, ctx.pool.as_ref());
        futures::pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            print!("{}", chunk?);
        }
        println!();
    } else {
        let text = client
            .generate(&messages, &options, &credential, ctx.pool.as_ref())
            .await?;
        println!("{text}");
    }

    Ok(())
}
