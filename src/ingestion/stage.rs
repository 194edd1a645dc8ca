//! Stage step of the ingestion pipeline (§4.1 stage 3).
//!
//! Each register CSV is truncated-and-reloaded into its staging table as
//! plain text columns (typing happens in the transform SQL, not here) —
//! this mirrors the original's pandas `to_sql(..., method="multi")` bulk
//! load, done here with `sqlx::QueryBuilder` in chunks of 1000 rows.

use std::path::Path;

use sqlx::PgPool;
use tracing::info;

use crate::error::AppError;

const CHUNK_SIZE: usize = 1000;

/// Read a CSV file, lowercase its header row, `TRUNCATE` the target staging
/// table, and bulk-insert every row as text columns matching the header
/// names. Returns the row count re-read from the store after load.
pub async fn stage_csv(pool: &PgPool, table: &str, csv_path: &Path) -> Result<i64, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(csv_path)
        .map_err(|e| AppError::Internal(e.into()))?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::Internal(e.into()))?
        .iter()
        .map(|h| h.trim().to_lowercase())
        .collect();

    let rows: Vec<csv::StringRecord> = reader
        .records()
        .collect::<Result<_, _>>()
        .map_err(|e| AppError::Internal(e.into()))?;

    sqlx::query(&format!("TRUNCATE staging.{table}"))
        .execute(pool)
        .await?;

    for chunk in rows.chunks(CHUNK_SIZE) {
        if chunk.is_empty() {
            continue;
        }
        let column_list = headers.join(", ");
        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(format!(
            "INSERT INTO staging.{table} ({column_list}) "
        ));
        builder.push_values(chunk, |mut b, record| {
            for field in record.iter() {
                let value = if field.is_empty() { None } else { Some(field) };
                b.push_bind(value);
            }
        });
        builder.build().execute(pool).await?;
    }

    let count: (i64,) = sqlx::query_as(&format!("SELECT count(*) FROM staging.{table}"))
        .fetch_one(pool)
        .await?;

    info!(table, rows = count.0, "staged csv");
    Ok(count.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn header_lowercasing_is_stable() {
        let csv_text = "ID_POSLA,Sifra_KO\n1,123\n";
        let temp = tempfile::NamedTempFile::new().unwrap();
        write!(temp.as_file(), "{csv_text}").unwrap();

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(temp.path())
            .unwrap();
        let headers: Vec<String> = reader
            .headers()
            .unwrap()
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        assert_eq!(headers, vec!["id_posla".to_string(), "sifra_ko".to_string()]);
    }
}
