use std::sync::Arc;

use tokio::net::TcpListener;

use sciensaurus::{
    api::routes::create_router,
    config::Config,
    http::{build_client, ReqwestHttp},
    llm::OpenRouterModel,
    logging::{init_tracing, TracingTracer},
    storage::SqliteStore,
    AppState,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load()?;
    let server_addr = config.server_addr;

    let client = build_client(config.http_timeout)?;
    let model = OpenRouterModel::new(
        client.clone(),
        config.openrouter_api_key.clone(),
        config.llm_model.clone(),
        config.llm_base_url.clone(),
    )
    .with_site_url(config.site_url.clone());
    let store = SqliteStore::connect(&config.database_url).await?;
    tracing::info!(database = %config.database_url, model = %config.llm_model, "storage and model ready");

    let app_state = AppState::assemble(
        config,
        Arc::new(ReqwestHttp::new(client)),
        Arc::new(model),
        Arc::new(store),
        Arc::new(TracingTracer),
    );
    let app = create_router(app_state);

    let listener = TcpListener::bind(server_addr).await?;
    tracing::info!(%server_addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
