//! `status` command: pool health at a glance.

use anyhow::Result;

use super::AppContext;

pub async fn run(ctx: &AppContext) -> Result<()> {
    let status = ctx.pool.status().await;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!(
        "Tokens: {} total, {} available, {} banned, {} expired",
        status.total, status.available, status.banned, status.expired
    );
    for row in &status.credentials {
        let state = if row.is_banned {
            "BANNED "
        } else if row.is_expired {
            "EXPIRED"
        } else {
            "OK     "
        };
        let mut line = format!(
            "  [{state}] {}  requests={} errors={} quota={}/{} ({:.1}%)",
            row.account, row.request_count, row.error_count, row.quota_used, row.quota_limit,
            row.quota_percent
        );
        if row.is_banned {
            line.push_str(&format!("  reason: {}", row.ban_reason));
        }
        println!("{line}");
    }

    Ok(())
}
