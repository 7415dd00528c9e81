use paas_catalog::config::AppConfig;
use paas_catalog::model::schema::validate_registry;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    env_logger::Builder::from_env(
        env_logger::Env::new()
            .filter_or("CATALOG_LOG", "info")
            .write_style("CATALOG_LOG_STYLE"),
    )
    .init();

    let config = AppConfig::load()?;
    log::info!(
        "configuration loaded: server={} organization={} watch timeout={}s",
        config.server_address(),
        config.store.organization,
        config.watch.timeout_secs
    );

    validate_registry()?;

    let catalog = paas_catalog::build_catalog(&config);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("catalog server running on http://{}", bind_address);

    paas_catalog::serve(listener, catalog).await
}
