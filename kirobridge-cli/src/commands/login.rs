//! `login` command: mint a credential through the browser OAuth flow.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use tracing::warn;

use kirobridge_core::IdentityProvider;
use kirobridge_oauth::AcquisitionFlow;
use kirobridge_pool::{CredentialStore, TokenRecord};

use super::AppContext;

/// Arguments for the login command.
#[derive(Args)]
pub struct LoginArgs {
    /// Identity provider to authorize with (google or github).
    #[arg(long, default_value = "google")]
    pub idp: String,
}

pub async fn run(ctx: &AppContext, args: &LoginArgs) -> Result<()> {
    let idp = IdentityProvider::parse(&args.idp);
    let flow = AcquisitionFlow::new(ctx.portal.clone(), &ctx.settings);

    let minted = flow
        .acquire(idp, |url| {
            println!("Open this URL in your browser to authorize:\n\n  {url}\n");
            println!(
                "Waiting up to {} seconds for the callback...",
                ctx.settings.oauth_wait_secs
            );
        })
        .await?;

    let mut record = TokenRecord::from_minted(&minted);

    // Label the token file by account where the portal knows one
    if let Some(probe) = record.to_credential("pending") {
        match ctx.portal.get_user_info(&probe).await {
            Ok(info) if !info.email.is_empty() => record.email = Some(info.email),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "Could not fetch account info for new credential"),
        }
    }

    let id = record
        .email
        .as_deref()
        .and_then(|email| email.split('@').next())
        .filter(|local| !local.is_empty())
        .map_or_else(
            || format!("webview-{}", Utc::now().format("%Y%m%d-%H%M%S")),
            sanitize_id,
        );
    ctx.store.save(&id, &record).await?;

    let count = ctx.pool.load().await?;
    println!("Credential saved as {id}; pool now holds {count} token(s)");
    Ok(())
}

/// Token file names stay within alphanumerics, dash, underscore, dot.
fn sanitize_id(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
