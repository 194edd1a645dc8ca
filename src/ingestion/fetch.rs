//! Download stage of the ingestion pipeline (§4.1 stage 1).
//!
//! Issues a metadata GET carrying `{filterParam=DRZAVA, filterValue=1,
//! filterYear=year}` against the dataset's eprostor.gov.si endpoint, reads
//! the `url` field from the JSON body, and streams that URL down to a temp
//! file, validating it as a zip archive before returning its path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::dataset::Dataset;
use crate::error::AppError;
use crate::ingestion::utils::validate_zip;

const NP_METADATA_URL: &str =
    "https://prostor3.gov.si/ejn-service/frontend/ejn-najemne-pogodbe/search";
const KPP_METADATA_URL: &str =
    "https://prostor3.gov.si/ejn-service/frontend/ejn-kupoprodajne-pogodbe/search";

fn metadata_url(dataset: Dataset) -> &'static str {
    match dataset {
        Dataset::Np => NP_METADATA_URL,
        Dataset::Kpp => KPP_METADATA_URL,
    }
}

/// Resolve the download URL for one `(dataset, year)` pair by calling the
/// register's metadata endpoint.
pub async fn resolve_download_url(
    client: &reqwest::Client,
    dataset: Dataset,
    year: i32,
) -> Result<String, AppError> {
    let response = client
        .get(metadata_url(dataset))
        .query(&[
            ("filterParam", "DRZAVA"),
            ("filterValue", "1"),
            ("filterYear", &year.to_string()),
        ])
        .header("User-Agent", "domogled-backend/0.1")
        .send()
        .await
        .map_err(|e| AppError::RemoteFormatError(e.to_string()))?;

    if !response.status().is_success() {
        return Err(AppError::RemoteFormatError(format!(
            "metadata endpoint returned {}",
            response.status()
        )));
    }

    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| AppError::RemoteFormatError(format!("metadata body is not JSON: {e}")))?;

    body.get("url")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::RemoteFormatError("metadata JSON missing 'url' field".into()))
}

/// Download the register archive for `(dataset, year)` into `temp_dir`,
/// returning the path to the saved zip. The archive is validated before
/// returning.
pub async fn download_archive(
    dataset: Dataset,
    year: i32,
    temp_dir: &Path,
    http_timeout: Duration,
) -> Result<PathBuf, AppError> {
    let client = reqwest::Client::builder()
        .timeout(http_timeout)
        .build()
        .map_err(|e| AppError::Internal(e.into()))?;

    let url = resolve_download_url(&client, dataset, year).await?;
    info!(%url, %dataset, year, "resolved register archive url");

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| AppError::RemoteFormatError(e.to_string()))?;
    if !response.status().is_success() {
        return Err(AppError::RemoteFormatError(format!(
            "archive download returned {}",
            response.status()
        )));
    }

    fs::create_dir_all(temp_dir)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    let zip_path = temp_dir.join(format!("{dataset}_{year}.zip"));
    let mut file = fs::File::create(&zip_path)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::RemoteFormatError(e.to_string()))?;
    // Written in fixed-size chunks to mirror the original's streamed
    // 8192-byte writes rather than one giant buffer-to-disk call.
    for chunk in bytes.chunks(8192) {
        file.write_all(chunk)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;
    }
    file.flush().await.map_err(|e| AppError::Internal(e.into()))?;
    info!(bytes = bytes.len(), path = %zip_path.display(), "downloaded register archive");

    validate_zip(&zip_path)?;
    Ok(zip_path)
}
