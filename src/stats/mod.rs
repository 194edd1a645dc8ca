//! Statistics materializer (C5, §4.4).

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, info_span, Instrument};

use crate::error::{AppError, AppResult};
use crate::sql;

#[derive(Debug, Clone, sqlx::FromRow)]
struct CacheRow {
    tip_regije: String,
    ime_regije: String,
    tip_posla: String,
    vrsta_nepremicnine: String,
    tip_obdobja: String,
    leto: Option<i32>,
    stevilo_poslov: i64,
    povprecna_cena: Option<Decimal>,
    mediana_cena: Option<Decimal>,
    povprecna_cena_m2: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodStat {
    pub leto: Option<i32>,
    pub stevilo_poslov: i64,
    pub povprecna_cena: Option<Decimal>,
    pub mediana_cena: Option<Decimal>,
    pub povprecna_cena_m2: Option<Decimal>,
}

impl From<&CacheRow> for PeriodStat {
    fn from(r: &CacheRow) -> Self {
        PeriodStat {
            leto: r.leto,
            stevilo_poslov: r.stevilo_poslov,
            povprecna_cena: r.povprecna_cena,
            mediana_cena: r.mediana_cena,
            povprecna_cena_m2: r.povprecna_cena_m2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct PropertyKindStats {
    pub yearly: Vec<PeriodStat>,
    pub last12m: Option<PeriodStat>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct DealKindStats {
    pub stanovanje: PropertyKindStats,
    pub hisa: PropertyKindStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct FullStatistics {
    pub sale: DealKindStats,
    pub rent: DealKindStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneralStatistics {
    pub sale_apartment: Option<PeriodStat>,
    pub sale_house: Option<PeriodStat>,
    pub rent_apartment: Option<PeriodStat>,
    pub rent_house: Option<PeriodStat>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct MunicipalityActivity {
    pub ime_regije: String,
    pub prodaja_stanovanje: i64,
    pub prodaja_hisa: i64,
    pub prodaja_skupaj: i64,
    pub najem_stanovanje: i64,
    pub najem_hisa: i64,
    pub najem_skupaj: i64,
    pub skupaj_vsi_posli: i64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct StatisticsStatus {
    pub cache_row_count: i64,
    pub distinct_region_count: i64,
    pub mv_prodajne_count: i64,
    pub mv_najemne_count: i64,
}

fn deal_kind(tip_posla: &str) -> &'static str {
    if tip_posla == "prodaja" {
        "sale"
    } else {
        "rent"
    }
}

/// Replace all four materialized views, truncate the cache table, then
/// repopulate yearly and trailing-12-month rows. Each step is transactional.
pub async fn refresh_all(pool: &PgPool) -> AppResult<()> {
    let span = info_span!("refresh_statistics");
    async move {
        info!("refreshing materialized views");
        for template in [
            "stats/create_mv_prodajne_stats.sql",
            "stats/create_mv_najemne_stats.sql",
            "stats/create_mv_prodajne_stats_12m.sql",
            "stats/create_mv_najemne_stats_12m.sql",
        ] {
            let view_sql = sql::load(template)?;
            sqlx::query(&view_sql).execute(pool).await?;
        }

        sqlx::query("TRUNCATE stats.statistike_cache")
            .execute(pool)
            .await?;

        let yearly_sql = sql::load("populate_statistike_cache.sql")?;
        let mut tx = pool.begin().await?;
        for statement in yearly_sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        let last12m_sql = sql::load("populate_statistike_cache_12m.sql")?;
        let mut tx = pool.begin().await?;
        for statement in last12m_sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        let row_count: (i64,) = sqlx::query_as("SELECT count(*) FROM stats.statistike_cache")
            .fetch_one(pool)
            .await?;
        info!(rows = row_count.0, "statistics refresh completed");
        Ok(())
    }
    .instrument(span)
    .await
}

fn validate_region_kind(region_kind: &str) -> Result<(), AppError> {
    match region_kind {
        "obcina" | "kat_obcina" | "slovenija" => Ok(()),
        other => Err(AppError::BadRequest(format!(
            "unknown region kind '{other}', expected 'obcina', 'kat_obcina', or 'slovenija'"
        ))),
    }
}

/// Every cache row for `(region_kind, region)`, organized into the fixed
/// sale/rent x apartment/house skeleton.
pub async fn get_full(pool: &PgPool, region_kind: &str, region: &str) -> AppResult<FullStatistics> {
    validate_region_kind(region_kind)?;

    let rows: Vec<CacheRow> = sqlx::query_as(
        "SELECT tip_regije, ime_regije, tip_posla, vrsta_nepremicnine, tip_obdobja, leto,
                stevilo_poslov, povprecna_cena, mediana_cena, povprecna_cena_m2
         FROM stats.statistike_cache
         WHERE tip_regije = $1 AND ime_regije = $2
         ORDER BY tip_posla, vrsta_nepremicnine, tip_obdobja, leto DESC NULLS LAST",
    )
    .bind(region_kind)
    .bind(region)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Err(AppError::NotFound(format!(
            "no statistics for {region_kind} '{region}'"
        )));
    }

    let mut full = FullStatistics {
        sale: DealKindStats::default(),
        rent: DealKindStats::default(),
    };

    for row in &rows {
        let deal = if deal_kind(&row.tip_posla) == "sale" {
            &mut full.sale
        } else {
            &mut full.rent
        };
        let kind = if row.vrsta_nepremicnine == "hisa" {
            &mut deal.hisa
        } else {
            &mut deal.stanovanje
        };

        if row.tip_obdobja == "zadnjih_12m" {
            kind.last12m = Some(row.into());
        } else {
            kind.yearly.push(row.into());
        }
    }

    Ok(full)
}

/// The four `last12m` rows only, flattened.
pub async fn get_general(pool: &PgPool, region_kind: &str, region: &str) -> AppResult<GeneralStatistics> {
    validate_region_kind(region_kind)?;

    let rows: Vec<CacheRow> = sqlx::query_as(
        "SELECT tip_regije, ime_regije, tip_posla, vrsta_nepremicnine, tip_obdobja, leto,
                stevilo_poslov, povprecna_cena, mediana_cena, povprecna_cena_m2
         FROM stats.statistike_cache
         WHERE tip_regije = $1 AND ime_regije = $2 AND tip_obdobja = 'zadnjih_12m'",
    )
    .bind(region_kind)
    .bind(region)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        return Err(AppError::NotFound(format!(
            "no statistics for {region_kind} '{region}'"
        )));
    }

    let mut general = GeneralStatistics {
        sale_apartment: None,
        sale_house: None,
        rent_apartment: None,
        rent_house: None,
    };

    for row in &rows {
        let stat = Some(PeriodStat::from(row));
        match (deal_kind(&row.tip_posla), row.vrsta_nepremicnine.as_str()) {
            ("sale", "stanovanje") => general.sale_apartment = stat,
            ("sale", "hisa") => general.sale_house = stat,
            ("rent", "stanovanje") => general.rent_apartment = stat,
            ("rent", "hisa") => general.rent_house = stat,
            _ => {}
        }
    }

    Ok(general)
}

/// Per-municipality (and optionally per-cadastral-municipality) activity
/// counts from the trailing-12-month cache rows.
pub async fn get_all_municipalities_last12m(
    pool: &PgPool,
    include_cadastral: bool,
) -> AppResult<Vec<MunicipalityActivity>> {
    let region_kinds: &[&str] = if include_cadastral {
        &["obcina", "kat_obcina"]
    } else {
        &["obcina"]
    };

    let rows: Vec<CacheRow> = sqlx::query_as(
        "SELECT tip_regije, ime_regije, tip_posla, vrsta_nepremicnine, tip_obdobja, leto,
                stevilo_poslov, povprecna_cena, mediana_cena, povprecna_cena_m2
         FROM stats.statistike_cache
         WHERE tip_regije = ANY($1) AND tip_obdobja = 'zadnjih_12m'
         ORDER BY ime_regije",
    )
    .bind(region_kinds)
    .fetch_all(pool)
    .await?;

    let mut by_region: std::collections::BTreeMap<String, MunicipalityActivity> =
        std::collections::BTreeMap::new();

    for row in &rows {
        let entry = by_region
            .entry(row.ime_regije.clone())
            .or_insert_with(|| MunicipalityActivity {
                ime_regije: row.ime_regije.clone(),
                ..Default::default()
            });

        match (deal_kind(&row.tip_posla), row.vrsta_nepremicnine.as_str()) {
            ("sale", "stanovanje") => entry.prodaja_stanovanje += row.stevilo_poslov,
            ("sale", "hisa") => entry.prodaja_hisa += row.stevilo_poslov,
            ("rent", "stanovanje") => entry.najem_stanovanje += row.stevilo_poslov,
            ("rent", "hisa") => entry.najem_hisa += row.stevilo_poslov,
            _ => {}
        }
    }

    let mut result: Vec<MunicipalityActivity> = by_region.into_values().collect();
    for m in result.iter_mut() {
        m.prodaja_skupaj = m.prodaja_stanovanje + m.prodaja_hisa;
        m.najem_skupaj = m.najem_stanovanje + m.najem_hisa;
        m.skupaj_vsi_posli = m.prodaja_skupaj + m.najem_skupaj;
    }

    Ok(result)
}

/// Admin/diagnostic introspection, supplemented from the original's
/// `get_statistics_status` — not part of the spec's read API table but kept
/// for the admin surface and for cheap sanity tests.
pub async fn status(pool: &PgPool) -> AppResult<StatisticsStatus> {
    let cache_row_count: (i64,) = sqlx::query_as("SELECT count(*) FROM stats.statistike_cache")
        .fetch_one(pool)
        .await?;
    let distinct_region_count: (i64,) =
        sqlx::query_as("SELECT count(DISTINCT ime_regije) FROM stats.statistike_cache")
            .fetch_one(pool)
            .await?;
    let mv_prodajne_count: (i64,) =
        sqlx::query_as("SELECT count(*) FROM stats.mv_prodajne_statistike")
            .fetch_one(pool)
            .await
            .unwrap_or((0,));
    let mv_najemne_count: (i64,) =
        sqlx::query_as("SELECT count(*) FROM stats.mv_najemne_statistike")
            .fetch_one(pool)
            .await
            .unwrap_or((0,));

    Ok(StatisticsStatus {
        cache_row_count: cache_row_count.0,
        distinct_region_count: distinct_region_count.0,
        mv_prodajne_count: mv_prodajne_count.0,
        mv_najemne_count: mv_najemne_count.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_region_kind() {
        assert!(validate_region_kind("planet").is_err());
        assert!(validate_region_kind("obcina").is_ok());
    }

    #[test]
    fn deal_kind_maps_prodaja_and_najem() {
        assert_eq!(deal_kind("prodaja"), "sale");
        assert_eq!(deal_kind("najem"), "rent");
    }
}
