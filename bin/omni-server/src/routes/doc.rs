use axum::Json;
use utoipa::OpenApi;

use crate::routes::{api, health};

#[derive(OpenApi)]
#[openapi(info(
    title = "omni-server",
    description = "Streaming chat relay API",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(api::api_docs());
    root
}

/// Serve the generated OpenAPI document.
pub async fn get_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(get_docs())
}
