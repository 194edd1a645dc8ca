use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use super::handlers;
use super::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = build_cors(&state.config.cors_origins);

    Router::new()
        .route("/", get(handlers::health_check))
        .route("/api/health", get(handlers::health_check))
        .route("/api/deli-stavb/ingest", post(handlers::ingest_deli_stavb))
        .route("/api/deduplication/ingest", post(handlers::ingest_deduplication))
        .route("/api/energetske-izkaznice/ingest", post(handlers::ingest_ei))
        .route("/api/statistike/posodobi", post(handlers::refresh_statistics))
        .route("/api/statistike/vse/:region_kind/:region", get(handlers::get_full_statistics))
        .route(
            "/api/statistike/splosne/:region_kind/:region",
            get(handlers::get_general_statistics),
        )
        .route(
            "/api/statistike/vse-obcine-posli-zadnjih-12m",
            get(handlers::get_all_municipalities),
        )
        .route("/properties/geojson", get(handlers::get_properties_geojson))
        .route("/property-details/:deduplicated_id", get(handlers::get_property_details))
        .route("/cluster/:cluster_id/properties", get(handlers::get_cluster_properties))
        .route("/property/:deduplicated_id/similar", get(handlers::get_similar_properties))
        .layer(cors)
        .with_state(state)
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| o.parse::<HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new().allow_methods([Method::GET, Method::POST]);

    if allowed.is_empty() {
        cors.allow_origin(tower_http::cors::AllowOrigin::any())
    } else {
        cors.allow_origin(allowed).allow_credentials(true)
    }
}
