use anyhow::Result;
use std::sync::Arc;
use tigris_sentinel::{config::Settings, AppContext, run};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load()?;
    let ctx: Arc<AppContext> = AppContext::bootstrap(settings).await?;
    tracing::info!(app = %ctx.settings.app.name, env = ctx.env(), "bootstrap complete");
    run(ctx).await
}
