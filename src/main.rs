use anyhow::Result;
use heic_convert::{app, config::AppConfig, AppState};
use poem::{listener::TcpListener, Server};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // a missing .env is fine, everything has a default
    dotenvy::dotenv().ok();

    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "INFO");
    }
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env()?;
    let state = AppState::from_config(&config)?;

    info!(
        "uploads in {}, listening on {}",
        state.storage.dir().display(),
        config.bind_addr()
    );

    Server::new(TcpListener::bind(config.bind_addr()))
        .run(app(state))
        .await?;

    Ok(())
}
