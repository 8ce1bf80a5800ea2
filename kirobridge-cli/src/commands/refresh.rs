//! `refresh` command: refresh every expired credential.

use anyhow::Result;

use super::AppContext;

pub async fn run(ctx: &AppContext) -> Result<()> {
    let refreshed = ctx.pool.refresh_all().await;
    let status = ctx.pool.status().await;
    println!(
        "Refreshed {refreshed} token(s); {} of {} now available",
        status.available, status.total
    );
    Ok(())
}
