// src/handlers/health.rs

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses(
        (status = 200, description = "Serviço no ar", body = String)
    )
)]
pub async fn health() -> &'static str {
    "OK"
}
