//! Referential audit and transform steps of the ingestion pipeline
//! (§4.1 stages 4-5).

use sqlx::PgPool;
use tracing::{info, warn};

use crate::dataset::Dataset;
use crate::error::AppError;
use crate::sql;

/// Count staged building parts whose `id_posla` has no matching staged deal,
/// logging up to 5 offending ids. Never fails the run: a diagnostic only.
pub async fn referential_audit(pool: &PgPool, dataset: Dataset) {
    let posel_table = format!("staging.{}_posel", dataset.table_prefix());
    let del_stavbe_table = format!("staging.{}_del_stavbe", dataset.table_prefix());

    let query = format!(
        "SELECT d.id_posla, count(*) AS n
         FROM {del_stavbe_table} d
         LEFT JOIN {posel_table} p ON p.id_posla = d.id_posla
         WHERE p.id_posla IS NULL
         GROUP BY d.id_posla
         ORDER BY n DESC
         LIMIT 5"
    );

    match sqlx::query_as::<_, (Option<String>, i64)>(&query)
        .fetch_all(pool)
        .await
    {
        Ok(rows) if rows.is_empty() => {
            info!(%dataset, "referential audit: no orphaned building parts");
        }
        Ok(rows) => {
            warn!(%dataset, orphans = rows.len(), "referential audit found orphaned building parts");
            for (id_posla, count) in rows {
                warn!(%dataset, id_posla = ?id_posla, count, "orphaned building part group");
            }
        }
        Err(e) => {
            warn!(%dataset, error = %e, "referential audit query failed, continuing");
        }
    }
}

/// Replace the `leto = year` partition of both core tables for `dataset`
/// within a single transaction: deals are transformed before building parts
/// so the foreign key is satisfied. Rolls back and re-raises on any error.
pub async fn transform_partition(
    pool: &PgPool,
    dataset: Dataset,
    year: i32,
) -> Result<(), AppError> {
    let posel_table = dataset.posel_table();
    let del_stavbe_table = dataset.del_stavbe_table();
    let posel_sql = sql::load(&format!("{}_posel_transform.sql", dataset.table_prefix()))?;
    let del_stavbe_sql = sql::load(&format!(
        "{}_del_stavbe_transform.sql",
        dataset.table_prefix()
    ))?;

    let mut tx = pool.begin().await?;

    sqlx::query(&format!("DELETE FROM core.{del_stavbe_table} WHERE leto = $1"))
        .bind(year)
        .execute(&mut *tx)
        .await?;
    sqlx::query(&format!("DELETE FROM core.{posel_table} WHERE leto = $1"))
        .bind(year)
        .execute(&mut *tx)
        .await?;

    sqlx::query(&posel_sql.replace(":leto", "$1"))
        .bind(year)
        .execute(&mut *tx)
        .await?;
    sqlx::query(&del_stavbe_sql.replace(":leto", "$1"))
        .bind(year)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    info!(%dataset, year, "transformed partition");
    Ok(())
}
