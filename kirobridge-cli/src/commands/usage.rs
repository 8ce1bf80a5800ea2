//! `usage` command: quota queries through the pool.

use anyhow::{bail, Result};
use clap::Args;

use kirobridge_core::{Credential, UsageSnapshot};
use kirobridge_wire::WireError;

use super::AppContext;

/// Arguments for the usage command.
#[derive(Args)]
pub struct UsageArgs {
    /// Query every credential in the store, not just the next one in
    /// rotation.
    #[arg(long)]
    pub all: bool,
}

pub async fn run(ctx: &AppContext, args: &UsageArgs) -> Result<()> {
    let credentials: Vec<Credential> = if args.all {
        use kirobridge_pool::CredentialStore;
        ctx.store
            .list()
            .await?
            .iter()
            .filter_map(|(id, record)| record.to_credential(id))
            .collect()
    } else {
        match ctx.pool.select().await {
            Some(credential) => vec![credential],
            None => bail!("No tokens available in the pool"),
        }
    };

    let mut snapshots = Vec::new();
    for credential in &credentials {
        match ctx.portal.get_usage(credential).await {
            Ok(snapshot) => {
                ctx.pool.record_usage(&credential.id, &snapshot).await;
                ctx.pool.report_success(&credential.id).await;
                if !ctx.json {
                    print_snapshot(credential, &snapshot);
                }
                snapshots.push(snapshot);
            }
            Err(err) => {
                report_usage_error(ctx, credential, &err).await;
                eprintln!("[{}] {err}", credential.label());
            }
        }
    }

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    }

    Ok(())
}

/// Turns a wire error into the matching pool report.
async fn report_usage_error(ctx: &AppContext, credential: &Credential, err: &WireError) {
    match err {
        WireError::QuotaExceeded => ctx.pool.report_quota_exceeded(&credential.id).await,
        WireError::Suspended => {
            ctx.pool
                .report_failure(&credential.id, "Account suspended")
                .await;
        }
        WireError::Unauthorized => {
            ctx.pool
                .report_failure(&credential.id, "Unauthorized: token expired or invalid")
                .await;
        }
        // Decode failures are not the credential's fault
        WireError::Decode(_) | WireError::Envelope(_) => {}
        other => ctx.pool.report_failure(&credential.id, &other.to_string()).await,
    }
}

fn print_snapshot(credential: &Credential, snapshot: &UsageSnapshot) {
    let who = if snapshot.email.is_empty() {
        credential.label()
    } else {
        &snapshot.email
    };
    println!(
        "{who}: {} ({} days until reset)",
        if snapshot.subscription_title.is_empty() {
            &snapshot.subscription_tier
        } else {
            &snapshot.subscription_title
        },
        snapshot.days_until_reset
    );
    for resource in &snapshot.resources {
        println!(
            "  {}: {}/{} used ({:.1}%), {} remaining",
            resource.display_name,
            resource.used,
            resource.limit,
            resource.percent_used(),
            resource.remaining()
        );
        if let Some(trial) = &resource.trial {
            println!(
                "  trial: {}/{} used ({})",
                trial.used, trial.limit, trial.status
            );
        }
        for bonus in &resource.bonuses {
            println!(
                "  bonus {}: {} remaining ({})",
                bonus.display_name,
                bonus.remaining(),
                bonus.status
            );
        }
    }
    println!("  total remaining: {}", snapshot.total_remaining());
}
