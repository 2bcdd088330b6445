//src/main.rs

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod common;
mod config;
mod db;
mod docs;
mod handlers;
mod middleware;
mod models;
mod services;

use crate::config::{AppState, Config};
use crate::docs::ApiDoc;
use crate::middleware::{admin_auth::admin_guard, webhook_auth::webhook_secret_guard};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    // Configuração inválida aborta a subida, antes de abrir qualquer conexão
    let config = Config::from_env()?;
    let app_state = AppState::new(config).await?;

    sqlx::migrate!().run(&app_state.db_pool).await?;
    tracing::info!("✅ Migrações do banco de dados executadas com sucesso!");

    let jobs = app_state.spawn_jobs();
    tracing::info!(jobs = jobs.len(), "✅ Jobs periódicos iniciados");

    let app = router(app_state.clone());

    // Inicia o servidor
    let listener = TcpListener::bind(&app_state.config.bind_addr).await?;
    tracing::info!("🚀 Servidor escutando em {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

fn router(app_state: AppState) -> Router {
    // Entrada do Telegram (protegida pelo segredo do webhook)
    let telegram_routes = Router::new()
        .route("/webhook", post(handlers::webhook::receive_update))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            webhook_secret_guard,
        ));

    let mut app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/api/health", get(handlers::health::health))
        .nest("/api/telegram", telegram_routes);

    if app_state.config.admin_api_token.is_some() {
        let admin_routes = Router::new()
            .route("/chats/{chat_id}/bind", post(handlers::admin::bind_chat))
            .route("/chats/{chat_id}/metrics/backfill", post(handlers::admin::backfill_metrics))
            .route("/tenants/{tenant_id}/participants/merge", post(handlers::admin::merge_participants))
            .route("/applications/{application_id}/move", post(handlers::admin::move_application))
            .layer(axum_middleware::from_fn_with_state(
                app_state.clone(),
                admin_guard,
            ));
        app = app.nest("/api/admin", admin_routes);
    } else {
        tracing::info!("ADMIN_API_TOKEN ausente, rotas de operador desativadas");
    }

    app.with_state(app_state)
}
