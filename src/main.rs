use anyhow::Context;
use babblr::{api, config::Config, AppState};
use clap::Parser;
use log::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let config = Config::parse();
    let state = AppState::from_config(&config)
        .await
        .context("failed to set up message and session stores")?;

    let routes = api::build_filters(state);

    let (addr, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(config.addr(), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("failed to listen for ctrl-c: {}", e);
            }
        })
        .with_context(|| format!("failed to bind {}", config.addr()))?;

    info!("babblr listening on http://{}", addr);
    server.await;
    info!("babblr stopped");

    Ok(())
}
