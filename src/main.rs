use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use warp::Filter;

use classroom_sync::api;
use classroom_sync::catalog::{ManifestCatalog, MaterialCatalog};
use classroom_sync::classroom::{ClassroomServer, RegistrySettings};
use classroom_sync::config::{Config, LogFormat};

#[tokio::main]
async fn main() -> classroom_sync::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.logging.format);

    let catalog = ManifestCatalog::load(&config.catalog.materials_dir)?;
    if let Some(default) = &config.catalog.default_material_id {
        if catalog.total_pages(default).is_none() {
            tracing::warn!(material_id = %default, "Default material is not in the catalog");
        }
    }

    let server = Arc::new(ClassroomServer::new(
        Arc::new(catalog),
        RegistrySettings::from(&config),
    ));

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST"])
        .allow_headers(vec!["content-type"]);
    let routes = api::routes(server, config.connection).with(cors);

    let addr = config.bind_address()?;
    tracing::info!(
        addr = %addr,
        ping_interval_secs = config.connection.ping_interval.as_secs(),
        grace_period_secs = config.rooms.grace_period.as_secs(),
        "classroom-sync listening"
    );

    warp::serve(routes).run(addr).await;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
