use std::{error::Error, sync::Arc};

use axum::http::{header::CONTENT_TYPE, HeaderValue, Method};
use tokio::{fs, net};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{
    layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter,
};

use repair_hub::{db, http, metrics, ticket, Config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = fs::read_to_string("config.toml").await?;
    let config = toml::from_str::<Config>(&config)?;

    let pool = db::connect(&config.db).await?;
    if config.db.bootstrap_schema {
        pool.bootstrap_schema().await?;
    }

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);
    for origin in &config.http.cors.allowed_origins {
        cors = cors.allow_origin(origin.parse::<HeaderValue>()?);
    }

    let app = http::router(Arc::new(http::AppState {
        writer: ticket::Writer::new(
            Arc::new(pool.clone()),
            config.deadlines.create_ticket,
        ),
        metrics: metrics::Aggregator::new(
            Arc::new(pool),
            config.deadlines.metrics,
        ),
    }))
    .layer(cors);

    let listener = net::TcpListener::bind(config.http.server.addr).await?;
    info!(addr = %config.http.server.addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
