use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use wbot_core::{
    config::Config,
    dedup::DedupStore,
    dispatch::{handler_fn, DEFAULT_PRIORITY},
    model::Post,
    orchestrator::Orchestrator,
    session::Session,
};
use wbot_weibo::WeiboClient;

#[tokio::main]
async fn main() -> Result<(), wbot_core::Error> {
    wbot_core::logging::init("wbot")?;

    let cfg = Config::load()?;
    let client = Arc::new(WeiboClient::new(&cfg.credentials)?);
    let session = Arc::new(Session::new(
        client.clone(),
        cfg.token_refresh_interval,
        cfg.code_poll_interval,
    ));
    let dedup = DedupStore::open(&cfg.store_path).await?;

    let mut orch = Orchestrator::new(cfg, session, client.clone(), client, dedup);

    // Baseline plugin: trace every new post. Real deployments register
    // their own handlers here.
    orch.on_new_post(
        DEFAULT_PRIORITY,
        handler_fn(|post: Post| async move {
            tracing::info!(id = %post.id, text = post.full_text(), "new post");
            Ok(())
        }),
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    orch.run(shutdown).await
}
