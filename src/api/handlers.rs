use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::clustering::{self, BBox, TileFilters};
use crate::dataset::Dataset;
use crate::error::{AppError, AppResult};
use crate::{dedup, ingestion, similarity, stats};

use super::state::AppState;

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    status: &'static str,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { status: "success", data })
}

#[derive(Serialize)]
struct Accepted {
    status: &'static str,
    message: String,
}

fn accepted(message: impl Into<String>) -> (StatusCode, Json<Accepted>) {
    (
        StatusCode::ACCEPTED,
        Json(Accepted {
            status: "success",
            message: message.into(),
        }),
    )
}

fn default_start_year(dataset: Dataset) -> i32 {
    match dataset {
        Dataset::Kpp => 2007,
        Dataset::Np => 2013,
    }
}

const DEFAULT_END_YEAR: i32 = 2025;

#[derive(Deserialize)]
pub struct IngestQuery {
    data_type: String,
    start_year: Option<i32>,
    end_year: Option<i32>,
}

/// `POST /api/deli-stavb/ingest`.
pub async fn ingest_deli_stavb(
    State(state): State<AppState>,
    Query(q): Query<IngestQuery>,
) -> AppResult<impl axum::response::IntoResponse> {
    let dataset: Dataset = q.data_type.parse()?;
    let start_year = q.start_year.unwrap_or_else(|| default_start_year(dataset));
    let end_year = q.end_year.unwrap_or(DEFAULT_END_YEAR);

    if start_year > end_year {
        return Err(AppError::BadRequest(format!(
            "start_year {start_year} is after end_year {end_year}"
        )));
    }

    let years: Vec<i32> = (start_year..=end_year).collect();
    let pool = state.db.clone();
    let config = state.config.clone();

    state
        .jobs
        .spawn(
            "ingest_deli_stavb",
            vec![format!("dataset:{dataset}")],
            async move {
                for year in years {
                    if let Err(e) = ingestion::pipeline::run_ingestion(
                        &pool,
                        dataset,
                        year,
                        &config.temp_dir,
                        config.http_timeout,
                    )
                    .await
                    {
                        tracing::warn!(%dataset, year, error = %e, "ingestion job failed for year");
                    }
                }
            },
        )
        .await?;

    Ok(accepted(format!(
        "ingestion enqueued for {dataset} years {start_year}..={end_year}"
    )))
}

#[derive(Deserialize)]
pub struct DedupQuery {
    data_type: String,
}

/// `POST /api/deduplication/ingest`.
pub async fn ingest_deduplication(
    State(state): State<AppState>,
    Query(q): Query<DedupQuery>,
) -> AppResult<impl axum::response::IntoResponse> {
    let datasets: Vec<Dataset> = match q.data_type.to_lowercase().as_str() {
        "vsi" => Dataset::all().to_vec(),
        other => vec![other.parse()?],
    };

    let pool = state.db.clone();
    let tags = datasets.iter().map(|d| format!("dataset:{d}")).collect();

    state
        .jobs
        .spawn("deduplication", tags, async move {
            dedup::build_all_deduplicated(&pool, &datasets).await;
        })
        .await?;

    Ok(accepted("deduplication enqueued"))
}

#[derive(Deserialize)]
pub struct EiIngestQuery {
    url: Option<String>,
}

/// `POST /api/energetske-izkaznice/ingest`.
pub async fn ingest_ei(
    State(state): State<AppState>,
    Query(q): Query<EiIngestQuery>,
) -> AppResult<impl axum::response::IntoResponse> {
    let pool = state.db.clone();
    let timeout = state.config.http_timeout;

    state
        .jobs
        .spawn(
            "energetske_izkaznice_ingest",
            vec!["ei".to_string()],
            async move {
                if let Err(e) = ingestion::energy::run_ei_ingestion(&pool, q.url, timeout).await {
                    tracing::warn!(error = %e, "energy certificate ingestion job failed");
                }
            },
        )
        .await?;

    Ok(accepted("energy certificate ingestion enqueued"))
}

/// `POST /api/statistike/posodobi`.
pub async fn refresh_statistics(
    State(state): State<AppState>,
) -> AppResult<impl axum::response::IntoResponse> {
    let pool = state.db.clone();
    // Reserve every dataset's tag, not just a standalone "stats" tag, so a
    // refresh can't start while deduplication is still running on any
    // dataset (and vice versa) — they share the `dataset:{d}` tag space.
    let tags = Dataset::all().iter().map(|d| format!("dataset:{d}")).collect();

    state
        .jobs
        .spawn("refresh_statistics", tags, async move {
            if let Err(e) = stats::refresh_all(&pool).await {
                tracing::warn!(error = %e, "statistics refresh job failed");
            }
        })
        .await?;

    Ok(accepted("statistics refresh enqueued"))
}

/// `GET /api/statistike/vse/{regionKind}/{region}`.
pub async fn get_full_statistics(
    State(state): State<AppState>,
    Path((region_kind, region)): Path<(String, String)>,
) -> AppResult<impl axum::response::IntoResponse> {
    let full = stats::get_full(&state.db, &region_kind, &region).await?;
    Ok(ok(full))
}

/// `GET /api/statistike/splosne/{regionKind}/{region}`.
pub async fn get_general_statistics(
    State(state): State<AppState>,
    Path((region_kind, region)): Path<(String, String)>,
) -> AppResult<impl axum::response::IntoResponse> {
    let general = stats::get_general(&state.db, &region_kind, &region).await?;
    Ok(ok(general))
}

#[derive(Deserialize)]
pub struct MunicipalitiesQuery {
    #[serde(default)]
    vkljuci_katastrske: bool,
}

/// `GET /api/statistike/vse-obcine-posli-zadnjih-12m`.
pub async fn get_all_municipalities(
    State(state): State<AppState>,
    Query(q): Query<MunicipalitiesQuery>,
) -> AppResult<impl axum::response::IntoResponse> {
    let rows = stats::get_all_municipalities_last12m(&state.db, q.vkljuci_katastrske).await?;
    Ok(ok(rows))
}

fn parse_bbox(raw: &str) -> AppResult<BBox> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 4 {
        return Err(AppError::BadRequest(format!(
            "bbox must have 4 comma-separated numbers, got '{raw}'"
        )));
    }
    let nums: Result<Vec<f64>, _> = parts.iter().map(|p| p.trim().parse::<f64>()).collect();
    let nums = nums.map_err(|_| AppError::BadRequest(format!("bbox contains a non-numeric value: '{raw}'")))?;
    Ok(BBox {
        west: nums[0],
        south: nums[1],
        east: nums[2],
        north: nums[3],
    })
}

#[derive(Deserialize)]
pub struct GeojsonQuery {
    bbox: String,
    zoom: f64,
    data_source: String,
    filter_leto: Option<i32>,
    min_cena: Option<rust_decimal::Decimal>,
    max_cena: Option<rust_decimal::Decimal>,
    min_povrsina: Option<rust_decimal::Decimal>,
    max_povrsina: Option<rust_decimal::Decimal>,
}

/// `GET /properties/geojson`.
pub async fn get_properties_geojson(
    State(state): State<AppState>,
    Query(q): Query<GeojsonQuery>,
) -> AppResult<impl axum::response::IntoResponse> {
    let dataset: Dataset = q.data_source.parse()?;
    let bbox = parse_bbox(&q.bbox)?;
    let filters = TileFilters {
        year_min: q.filter_leto,
        price_min: q.min_cena,
        price_max: q.max_cena,
        area_min: q.min_povrsina,
        area_max: q.max_povrsina,
    };

    let features = clustering::get_map_tile(&state.db, dataset, bbox, q.zoom, &filters).await?;
    Ok(ok(json!({ "type": "FeatureCollection", "features": features })))
}

#[derive(Deserialize)]
pub struct DataSourceQuery {
    data_source: String,
}

/// `GET /property-details/{deduplicated_id}`.
pub async fn get_property_details(
    State(state): State<AppState>,
    Path(deduplicated_id): Path<i64>,
    Query(q): Query<DataSourceQuery>,
) -> AppResult<impl axum::response::IntoResponse> {
    let dataset: Dataset = q.data_source.parse()?;
    let details = similarity::get_details(&state.db, dataset, deduplicated_id).await?;
    Ok(ok(details))
}

#[derive(Deserialize)]
pub struct ClusterQuery {
    data_source: String,
    filter_leto: Option<i32>,
    min_cena: Option<rust_decimal::Decimal>,
    max_cena: Option<rust_decimal::Decimal>,
    min_povrsina: Option<rust_decimal::Decimal>,
    max_povrsina: Option<rust_decimal::Decimal>,
}

/// `GET /cluster/{cluster_id}/properties`.
pub async fn get_cluster_properties(
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
    Query(q): Query<ClusterQuery>,
) -> AppResult<impl axum::response::IntoResponse> {
    let dataset: Dataset = q.data_source.parse()?;
    let filters = TileFilters {
        year_min: q.filter_leto,
        price_min: q.min_cena,
        price_max: q.max_cena,
        area_min: q.min_povrsina,
        area_max: q.max_povrsina,
    };

    let expansion = clustering::get_building_cluster(&state.db, dataset, &cluster_id, &filters).await?;
    Ok(ok(expansion))
}

#[derive(Deserialize)]
pub struct SimilarQuery {
    #[serde(default)]
    data_source: Option<String>,
    #[serde(default = "default_similar_limit")]
    limit: i64,
    #[serde(default = "default_radius_km")]
    radius_km: f64,
}

fn default_similar_limit() -> i64 {
    10
}

fn default_radius_km() -> f64 {
    5.0
}

/// `GET /property/{deduplicated_id}/similar`.
pub async fn get_similar_properties(
    State(state): State<AppState>,
    Path(deduplicated_id): Path<i64>,
    Query(q): Query<SimilarQuery>,
) -> AppResult<impl axum::response::IntoResponse> {
    let dataset: Dataset = q
        .data_source
        .as_deref()
        .unwrap_or("kpp")
        .parse()?;

    let results =
        similarity::get_similar(&state.db, dataset, deduplicated_id, q.limit, q.radius_km).await?;
    Ok(ok(results))
}

#[derive(Serialize)]
pub struct HealthBody {
    status: &'static str,
    message: &'static str,
}

pub async fn health_check() -> Json<HealthBody> {
    Json(HealthBody {
        status: "success",
        message: "domogled backend is running",
    })
}
