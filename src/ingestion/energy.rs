//! Energy-certificate ingestion (C3, §4.2).

use std::time::Duration;

use chrono::{Datelike, Local, NaiveDate};
use once_cell::sync::Lazy;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{info, info_span, warn, Instrument};

use crate::error::AppError;
use crate::ingestion::types::RawEnergyCertificateRow;
use crate::ingestion::utils::http_get;
use crate::sql;

static MONTH_ABBREV: Lazy<[&'static str; 12]> = Lazy::new(|| {
    [
        "jan", "feb", "mar", "apr", "maj", "jun", "jul", "avg", "sep", "okt", "nov", "dec",
    ]
});

const EI_BASE_URL: &str = "https://www.energetika-portal.si/fileadmin/dokumenti/publikacije/ei_register";

/// Synthesize this month's register URL:
/// `ei_javni_register_{monthAbbrev}{yearLast2}.csv`.
pub fn generate_current_url() -> String {
    let now = Local::now();
    let month_abbrev = MONTH_ABBREV[(now.month() as usize) - 1];
    let year_last2 = now.year() % 100;
    format!("{EI_BASE_URL}/ei_javni_register_{month_abbrev}{year_last2:02}.csv")
}

#[derive(Debug, Deserialize)]
struct RawCsvRow {
    #[serde(rename = "ID energetske izkaznice")]
    ei_id: Option<String>,
    #[serde(rename = "Datum izdelave")]
    datum_izdelave: Option<String>,
    #[serde(rename = "Velja do")]
    velja_do: Option<String>,
    #[serde(rename = "Sifra KO")]
    sifra_ko: Option<String>,
    #[serde(rename = "Stevilka stavbe")]
    stevilka_stavbe: Option<String>,
    #[serde(rename = "Stevilka dela stavbe")]
    stevilka_dela_stavbe: Option<String>,
    #[serde(rename = "Tip izkaznice")]
    tip_izkaznice: Option<String>,
    #[serde(rename = "Potrebna toplota za ogrevanje")]
    potrebna_toplota_ogrevanje: Option<String>,
    #[serde(rename = "Dovedena energija za delovanje sistemov")]
    dovedena_energija_delovanje: Option<String>,
    #[serde(rename = "Celotna energija")]
    celotna_energija: Option<String>,
    #[serde(rename = "Dovedena elektricna energija")]
    dovedena_elektricna_energija: Option<String>,
    #[serde(rename = "Primarna energija")]
    primarna_energija: Option<String>,
    #[serde(rename = "Emisije CO2")]
    emisije_co2: Option<String>,
    #[serde(rename = "Kondicionirana povrsina")]
    kondicionirana_povrsina: Option<String>,
    #[serde(rename = "Energijski razred")]
    energijski_razred: Option<String>,
    #[serde(rename = "EPBD tip")]
    epbd_tip: Option<String>,
}

fn none_if_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Strip thousands-separator dots and turn a decimal comma into a dot so the
/// value parses as a plain decimal number. Invalid input becomes `None`
/// rather than failing the whole row.
fn normalize_numeric(raw: Option<String>) -> Option<String> {
    let raw = none_if_empty(raw)?;
    let cleaned = raw.replace('.', "").replace(',', ".");
    cleaned.parse::<f64>().ok().map(|_| cleaned)
}

fn parse_sl_date(raw: Option<String>) -> Option<NaiveDate> {
    let raw = none_if_empty(raw)?;
    NaiveDate::parse_from_str(&raw, "%d.%m.%Y").ok()
}

fn clean_row(raw: RawCsvRow) -> Option<RawEnergyCertificateRow> {
    let ei_id = none_if_empty(raw.ei_id)?;

    Some(RawEnergyCertificateRow {
        ei_id: Some(ei_id),
        datum_izdelave: parse_sl_date(raw.datum_izdelave).map(|d| d.format("%Y-%m-%d").to_string()),
        velja_do: parse_sl_date(raw.velja_do).map(|d| d.format("%Y-%m-%d").to_string()),
        sifra_ko: none_if_empty(raw.sifra_ko),
        stevilka_stavbe: none_if_empty(raw.stevilka_stavbe),
        stevilka_dela_stavbe: none_if_empty(raw.stevilka_dela_stavbe),
        tip_izkaznice: none_if_empty(raw.tip_izkaznice),
        potrebna_toplota_ogrevanje: normalize_numeric(raw.potrebna_toplota_ogrevanje),
        dovedena_energija_delovanje: normalize_numeric(raw.dovedena_energija_delovanje),
        celotna_energija: normalize_numeric(raw.celotna_energija),
        dovedena_elektricna_energija: normalize_numeric(raw.dovedena_elektricna_energija),
        primarna_energija: normalize_numeric(raw.primarna_energija),
        emisije_co2: normalize_numeric(raw.emisije_co2),
        kondicionirana_povrsina: normalize_numeric(raw.kondicionirana_povrsina),
        energijski_razred: none_if_empty(raw.energijski_razred),
        epbd_tip: none_if_empty(raw.epbd_tip).map(|s| s.trim().to_string()),
    })
}

/// Parse the pipe-delimited EI register CSV, drop rows without an id, and
/// keep only the last occurrence of each `ei_id`.
fn parse_and_dedup(csv_text: &str) -> Result<Vec<RawEnergyCertificateRow>, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'|')
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(csv_text.as_bytes());

    let mut by_id: indexmap_like::InsertionOrderedMap = indexmap_like::InsertionOrderedMap::new();
    let mut dropped = 0usize;

    for result in reader.deserialize::<RawCsvRow>() {
        let raw = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "skipping malformed EI row");
                dropped += 1;
                continue;
            }
        };
        match clean_row(raw) {
            Some(cleaned) => {
                by_id.insert(cleaned.ei_id.clone().unwrap(), cleaned);
            }
            None => dropped += 1,
        }
    }

    info!(dropped, kept = by_id.len(), "cleaned EI csv rows");
    Ok(by_id.into_values())
}

/// Tiny insertion-order-preserving map used only to implement "dedup on
/// ei_id keeping the last occurrence" without pulling in the `indexmap`
/// crate for a single call site.
mod indexmap_like {
    use super::RawEnergyCertificateRow;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct InsertionOrderedMap {
        order: Vec<String>,
        values: HashMap<String, RawEnergyCertificateRow>,
    }

    impl InsertionOrderedMap {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&mut self, key: String, value: RawEnergyCertificateRow) {
            if !self.values.contains_key(&key) {
                self.order.push(key.clone());
            }
            self.values.insert(key, value);
        }

        pub fn len(&self) -> usize {
            self.order.len()
        }

        pub fn into_values(self) -> Vec<RawEnergyCertificateRow> {
            let InsertionOrderedMap { order, mut values } = self;
            order
                .into_iter()
                .filter_map(|k| values.remove(&k))
                .collect()
        }
    }
}

async fn stage_rows(pool: &PgPool, rows: &[RawEnergyCertificateRow]) -> Result<i64, AppError> {
    sqlx::query("TRUNCATE staging.energetska_izkaznica")
        .execute(pool)
        .await?;

    for chunk in rows.chunks(1000) {
        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
            "INSERT INTO staging.energetska_izkaznica (
                ei_id, datum_izdelave, velja_do, sifra_ko, stevilka_stavbe,
                stevilka_dela_stavbe, tip_izkaznice, potrebna_toplota_ogrevanje,
                dovedena_energija_delovanje, celotna_energija,
                dovedena_elektricna_energija, primarna_energija, emisije_co2,
                kondicionirana_povrsina, energijski_razred, epbd_tip
            ) ",
        );
        builder.push_values(chunk, |mut b, row| {
            b.push_bind(row.ei_id.clone())
                .push_bind(row.datum_izdelave.clone())
                .push_bind(row.velja_do.clone())
                .push_bind(row.sifra_ko.clone())
                .push_bind(row.stevilka_stavbe.clone())
                .push_bind(row.stevilka_dela_stavbe.clone())
                .push_bind(row.tip_izkaznice.clone())
                .push_bind(row.potrebna_toplota_ogrevanje.clone())
                .push_bind(row.dovedena_energija_delovanje.clone())
                .push_bind(row.celotna_energija.clone())
                .push_bind(row.dovedena_elektricna_energija.clone())
                .push_bind(row.primarna_energija.clone())
                .push_bind(row.emisije_co2.clone())
                .push_bind(row.kondicionirana_povrsina.clone())
                .push_bind(row.energijski_razred.clone())
                .push_bind(row.epbd_tip.clone());
        });
        builder.build().execute(pool).await?;
    }

    let count: (i64,) = sqlx::query_as("SELECT count(*) FROM staging.energetska_izkaznica")
        .fetch_one(pool)
        .await?;
    Ok(count.0)
}

pub async fn run_ei_ingestion(
    pool: &PgPool,
    url: Option<String>,
    http_timeout: Duration,
) -> Result<(), AppError> {
    let span = info_span!("run_ei_ingestion");
    async move {
        let url = url.unwrap_or_else(generate_current_url);
        info!(%url, "starting EI ingestion");

        let bytes = http_get(&url, http_timeout).await?;
        let csv_text = String::from_utf8(bytes)
            .map_err(|e| AppError::RemoteFormatError(format!("EI csv is not UTF-8: {e}")))?;

        let rows = parse_and_dedup(&csv_text)?;
        let staged = stage_rows(pool, &rows).await?;
        info!(staged, "staged EI rows");

        let insert_sql = sql::load("ei_insert.sql")?;
        let mut tx = pool.begin().await?;
        for statement in insert_sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!("EI ingestion completed");
        Ok(())
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_thousands_and_decimal_comma() {
        assert_eq!(
            normalize_numeric(Some("1.234,5".to_string())),
            Some("1234.5".to_string())
        );
        assert_eq!(normalize_numeric(Some("".to_string())), None);
        assert_eq!(normalize_numeric(None), None);
        assert_eq!(normalize_numeric(Some("abc".to_string())), None);
    }

    #[test]
    fn parses_slovenian_date_format() {
        assert_eq!(
            parse_sl_date(Some("05.03.2024".to_string())),
            NaiveDate::from_ymd_opt(2024, 3, 5)
        );
        assert_eq!(parse_sl_date(Some("not-a-date".to_string())), None);
    }

    #[test]
    fn drops_rows_without_ei_id() {
        let raw = RawCsvRow {
            ei_id: None,
            datum_izdelave: None,
            velja_do: None,
            sifra_ko: None,
            stevilka_stavbe: None,
            stevilka_dela_stavbe: None,
            tip_izkaznice: None,
            potrebna_toplota_ogrevanje: None,
            dovedena_energija_delovanje: None,
            celotna_energija: None,
            dovedena_elektricna_energija: None,
            primarna_energija: None,
            emisije_co2: None,
            kondicionirana_povrsina: None,
            energijski_razred: None,
            epbd_tip: None,
        };
        assert!(clean_row(raw).is_none());
    }

    #[test]
    fn dedup_keeps_last_occurrence() {
        let csv_text = "ID energetske izkaznice|Energijski razred\nAB-1|C\nAB-1|B\n";
        let rows = parse_and_dedup(csv_text).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].energijski_razred.as_deref(), Some("B"));
    }

    #[test]
    fn generates_plausible_month_url() {
        let url = generate_current_url();
        assert!(url.starts_with(EI_BASE_URL));
        assert!(url.ends_with(".csv"));
    }
}
