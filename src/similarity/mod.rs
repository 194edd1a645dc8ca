//! Property details and similarity engine (C7, §4.6, §4.7).

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use tracing::info;

use crate::dataset::Dataset;
use crate::error::{AppError, AppResult};
use crate::ingestion::types::EnergyCertificate;

static ENERGY_CLASSES: Lazy<Vec<&'static str>> =
    Lazy::new(|| vec!["A", "B", "C", "D", "E", "F", "G"]);

fn energy_class_index(class: &str) -> Option<i32> {
    ENERGY_CLASSES
        .iter()
        .position(|c| *c == class)
        .map(|i| i as i32)
}

fn decimal_to_f64(d: Decimal) -> Option<f64> {
    d.to_string().parse::<f64>().ok()
}

/// Mirrors the `vrsta_nepremicnine` CASE expression in the statistics
/// materialized views: only use code `1122001` counts as a house, every
/// other building part is a flat.
fn vrsta_nepremicnine(dejanska_raba: Option<&str>) -> &'static str {
    match dejanska_raba {
        Some("1122001") => "hisa",
        _ => "stanovanje",
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct DedupRow {
    deduplicated_id: i64,
    sifra_ko: i32,
    stevilka_stavbe: Option<i32>,
    stevilka_dela_stavbe: Option<i32>,
    dejanska_raba: Option<String>,
    obcina: Option<String>,
    naselje: Option<String>,
    ulica: Option<String>,
    hisna_stevilka: Option<String>,
    dodatek_hs: Option<String>,
    povrsina_uradna: Option<Decimal>,
    povrsina_uporabna: Option<Decimal>,
    leto_izgradnje_stavbe: Option<i32>,
    price: Option<Decimal>,
    energijski_razred: Option<String>,
    longitude: f64,
    latitude: f64,
    povezani_del_stavbe_ids: Vec<i64>,
    povezani_posel_ids: Vec<i64>,
    najnovejsi_del_stavbe_id: Option<i64>,
    energetske_izkaznice: Vec<i64>,
}

async fn load_reference(pool: &PgPool, dataset: Dataset, deduplicated_id: i64) -> AppResult<DedupRow> {
    let price_column = dataset.price_column();
    let table = dataset.deduplicated_table();
    let row: Option<DedupRow> = sqlx::query_as(&format!(
        "SELECT deduplicated_id, sifra_ko, stevilka_stavbe, stevilka_dela_stavbe,
                dejanska_raba, obcina, naselje, ulica, hisna_stevilka, dodatek_hs,
                povrsina_uradna, povrsina_uporabna, leto_izgradnje_stavbe,
                {price_column} AS price, energijski_razred,
                ST_X(coordinates) AS longitude, ST_Y(coordinates) AS latitude,
                povezani_del_stavbe_ids, povezani_posel_ids,
                najnovejsi_del_stavbe_id, energetske_izkaznice
         FROM core.{table}
         WHERE deduplicated_id = $1"
    ))
    .bind(deduplicated_id)
    .fetch_optional(pool)
    .await?;

    row.ok_or_else(|| AppError::NotFound(format!("deduplicated row {deduplicated_id} not found")))
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailsFeature {
    pub deduplicated_id: i64,
    pub data_source: &'static str,
    pub longitude: f64,
    pub latitude: f64,
    pub reprezentativni_del_stavbe_id: Option<i64>,
    pub povezani_deli_stavb: Vec<i64>,
    pub povezani_posli: Vec<i64>,
    pub stevilo_poslov: usize,
    pub ima_vec_poslov: bool,
    pub energetske_izkaznice: Vec<EnergyCertificate>,
}

/// `GetDetails` (C7a, §4.6).
pub async fn get_details(
    pool: &PgPool,
    dataset: Dataset,
    deduplicated_id: i64,
) -> AppResult<DetailsFeature> {
    let row = load_reference(pool, dataset, deduplicated_id).await?;

    if row.najnovejsi_del_stavbe_id.is_none() {
        return Err(AppError::NotFound(format!(
            "deduplicated row {deduplicated_id} has no representative building part"
        )));
    }

    let certificates = if row.energetske_izkaznice.is_empty() {
        Vec::new()
    } else {
        sqlx::query_as::<_, EnergyCertificate>(
            "SELECT id, ei_id, datum_izdelave, velja_do, sifra_ko, stevilka_stavbe,
                    stevilka_dela_stavbe, tip_izkaznice, potrebna_toplota_ogrevanje,
                    dovedena_energija_delovanje, celotna_energija,
                    dovedena_elektricna_energija, primarna_energija, emisije_co2,
                    kondicionirana_povrsina, energijski_razred, epbd_tip
             FROM core.energetska_izkaznica
             WHERE id = ANY($1)",
        )
        .bind(&row.energetske_izkaznice)
        .fetch_all(pool)
        .await?
    };

    Ok(DetailsFeature {
        deduplicated_id: row.deduplicated_id,
        data_source: dataset.table_prefix(),
        longitude: row.longitude,
        latitude: row.latitude,
        reprezentativni_del_stavbe_id: row.najnovejsi_del_stavbe_id,
        stevilo_poslov: row.povezani_posel_ids.len(),
        ima_vec_poslov: row.povezani_posel_ids.len() > 1,
        povezani_deli_stavb: row.povezani_del_stavbe_ids,
        povezani_posli: row.povezani_posel_ids,
        energetske_izkaznice: certificates,
    })
}

/// §4.7's `_format_naslov`: "street number[suffix], settlement?, municipality",
/// deduplicating settlement when it equals the municipality, falling back to
/// "Neznan naslov" when every component is empty.
pub fn format_address(
    ulica: Option<&str>,
    hisna_stevilka: Option<&str>,
    dodatek_hs: Option<&str>,
    naselje: Option<&str>,
    obcina: Option<&str>,
) -> String {
    let mut parts = Vec::new();

    let mut street_part = String::new();
    if let Some(u) = ulica.filter(|s| !s.trim().is_empty()) {
        street_part.push_str(u.trim());
    }
    if let Some(h) = hisna_stevilka.filter(|s| !s.trim().is_empty()) {
        if !street_part.is_empty() {
            street_part.push(' ');
        }
        street_part.push_str(h.trim());
        if let Some(d) = dodatek_hs.filter(|s| !s.trim().is_empty()) {
            street_part.push_str(d.trim());
        }
    }
    if !street_part.is_empty() {
        parts.push(street_part);
    }

    if let (Some(n), Some(o)) = (
        naselje.filter(|s| !s.trim().is_empty()),
        obcina.filter(|s| !s.trim().is_empty()),
    ) {
        if n.trim() != o.trim() {
            parts.push(n.trim().to_string());
        }
    } else if let Some(n) = naselje.filter(|s| !s.trim().is_empty()) {
        parts.push(n.trim().to_string());
    }

    if let Some(o) = obcina.filter(|s| !s.trim().is_empty()) {
        parts.push(o.trim().to_string());
    }

    if parts.is_empty() {
        "Neznan naslov".to_string()
    } else {
        parts.join(", ")
    }
}

#[derive(Debug, Clone, Copy)]
struct ScoreWeights;

impl ScoreWeights {
    const AREA: f64 = 30.0;
    const PRICE: f64 = 25.0;
    const LOCATION: f64 = 20.0;
    const CONSTRUCTION_YEAR: f64 = 15.0;
    const ENERGY_CLASS: f64 = 10.0;
}

fn linear_score(diff: f64, reference: f64, weight: f64) -> f64 {
    if reference == 0.0 {
        return 0.0;
    }
    (weight * (1.0 - (diff.abs() / reference))).max(0.0)
}

fn location_score(distance_km: f64) -> f64 {
    if distance_km <= 1.0 {
        ScoreWeights::LOCATION
    } else if distance_km <= 3.0 {
        15.0
    } else if distance_km <= 5.0 {
        10.0
    } else {
        (ScoreWeights::LOCATION * (1.0 - (distance_km - 5.0) / 10.0)).max(0.0)
    }
}

/// §4.7's 100-point scoring formula. Any criterion whose reference datum is
/// missing contributes neither score nor weight; the final score is
/// `100 * sum(score) / sum(weight_of_present_criteria)`.
pub fn similarity_score(
    ref_area: Option<f64>,
    cand_area: Option<f64>,
    ref_price: Option<f64>,
    cand_price: Option<f64>,
    distance_km: f64,
    ref_year: Option<i32>,
    cand_year: Option<i32>,
    ref_energy_class: Option<&str>,
    cand_energy_class: Option<&str>,
) -> f64 {
    let mut score = 0.0;
    let mut max_score = 0.0;

    if let (Some(ra), Some(ca)) = (ref_area, cand_area) {
        score += linear_score(ca - ra, ra, ScoreWeights::AREA);
        max_score += ScoreWeights::AREA;
    }

    if let (Some(rp), Some(cp)) = (ref_price, cand_price) {
        score += linear_score(cp - rp, rp, ScoreWeights::PRICE);
        max_score += ScoreWeights::PRICE;
    }

    // Location is always computable: distance is a function of the two
    // coordinates, which are guaranteed non-null (§3 invariants).
    score += location_score(distance_km);
    max_score += ScoreWeights::LOCATION;

    if let (Some(ry), Some(cy)) = (ref_year, cand_year) {
        let diff = (cy - ry) as f64;
        score += (ScoreWeights::CONSTRUCTION_YEAR * (1.0 - diff.abs() / 30.0)).max(0.0);
        max_score += ScoreWeights::CONSTRUCTION_YEAR;
    }

    if let (Some(re), Some(ce)) = (
        ref_energy_class.and_then(energy_class_index),
        cand_energy_class.and_then(energy_class_index),
    ) {
        let diff = (ce - re) as f64;
        score += (ScoreWeights::ENERGY_CLASS * (1.0 - diff.abs() / 6.0)).max(0.0);
        max_score += ScoreWeights::ENERGY_CLASS;
    }

    if max_score > 0.0 {
        (score / max_score) * 100.0
    } else {
        0.0
    }
}

/// Haversine distance in kilometers. The store projects to SRID 3857 for
/// `ST_Distance`; this mirrors that for the in-process candidate filter
/// before the scored list is built from the SQL-filtered candidate set.
pub fn haversine_km(lng1: f64, lat1: f64, lng2: f64, lat2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (lat1_r, lat2_r) = (lat1.to_radians(), lat2.to_radians());
    let dlat = (lat2 - lat1).to_radians();
    let dlng = (lng2 - lng1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1_r.cos() * lat2_r.cos() * (dlng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarProperty {
    pub deduplicated_id: i64,
    pub naslov: String,
    pub povrsina: Option<Decimal>,
    pub cena: Option<Decimal>,
    pub leto_izgradnje_stavbe: Option<i32>,
    pub energijski_razred: Option<String>,
    pub distance_km: f64,
    pub similarity_score: f64,
    pub obcina: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
}

fn area_of(row: &DedupRow) -> Option<Decimal> {
    row.povrsina_uradna.or(row.povrsina_uporabna)
}

/// `GetSimilar` (C7b, §4.7).
pub async fn get_similar(
    pool: &PgPool,
    dataset: Dataset,
    deduplicated_id: i64,
    limit: i64,
    radius_km: f64,
) -> AppResult<Vec<SimilarProperty>> {
    let reference = load_reference(pool, dataset, deduplicated_id).await?;

    let ref_area = area_of(&reference).and_then(decimal_to_f64);
    let ref_price = reference.price.and_then(decimal_to_f64);
    let ref_year = reference.leto_izgradnje_stavbe;

    let price_column = dataset.price_column();
    let table = dataset.deduplicated_table();

    let area_min = ref_area.map(|a| a * 0.85);
    let area_max = ref_area.map(|a| a * 1.15);
    let price_min = ref_price.map(|p| p * 0.85);
    let price_max = ref_price.map(|p| p * 1.15);
    let year_min = ref_year.map(|y| y - 10);
    let year_max = ref_year.map(|y| y + 10);

    let mut sql = format!(
        "SELECT deduplicated_id, sifra_ko, stevilka_stavbe, stevilka_dela_stavbe,
                dejanska_raba, obcina, naselje, ulica, hisna_stevilka, dodatek_hs,
                povrsina_uradna, povrsina_uporabna, leto_izgradnje_stavbe,
                {price_column} AS price, energijski_razred,
                ST_X(coordinates) AS longitude, ST_Y(coordinates) AS latitude,
                povezani_del_stavbe_ids, povezani_posel_ids,
                najnovejsi_del_stavbe_id, energetske_izkaznice
         FROM core.{table}
         WHERE deduplicated_id != $1
           AND (CASE WHEN dejanska_raba IN ('1122001') THEN 'hisa' ELSE 'stanovanje' END) = $2
           AND ST_Distance(ST_Transform(coordinates, 3857), ST_Transform($3, 3857)) <= $4"
    );

    let mut idx = 5;
    if area_min.is_some() {
        sql.push_str(&format!(
            " AND (povrsina_uradna BETWEEN ${idx} AND ${} OR povrsina_uporabna BETWEEN ${idx} AND ${})",
            idx + 1,
            idx + 1
        ));
        idx += 2;
    }
    if price_min.is_some() {
        sql.push_str(&format!(" AND {price_column} BETWEEN ${idx} AND ${}", idx + 1));
        idx += 2;
    }
    if year_min.is_some() {
        sql.push_str(&format!(
            " AND leto_izgradnje_stavbe BETWEEN ${idx} AND ${}",
            idx + 1
        ));
    }

    let reference_point = format!("POINT({} {})", reference.longitude, reference.latitude);

    let mut query = sqlx::query_as::<_, DedupRow>(&sql)
        .bind(deduplicated_id)
        .bind(vrsta_nepremicnine(reference.dejanska_raba.as_deref()))
        .bind(&reference_point)
        .bind(radius_km * 1000.0);

    if let (Some(lo), Some(hi)) = (area_min, area_max) {
        query = query.bind(Decimal::try_from(lo).unwrap_or_default())
            .bind(Decimal::try_from(hi).unwrap_or_default());
    }
    if let (Some(lo), Some(hi)) = (price_min, price_max) {
        query = query.bind(Decimal::try_from(lo).unwrap_or_default())
            .bind(Decimal::try_from(hi).unwrap_or_default());
    }
    if let (Some(lo), Some(hi)) = (year_min, year_max) {
        query = query.bind(lo).bind(hi);
    }

    let candidates: Vec<DedupRow> = query.fetch_all(pool).await?;
    info!(%dataset, deduplicated_id, candidates = candidates.len(), "similarity candidate pool");

    let mut scored: Vec<SimilarProperty> = candidates
        .into_iter()
        .map(|cand| {
            let distance_km = haversine_km(
                reference.longitude,
                reference.latitude,
                cand.longitude,
                cand.latitude,
            );
            let score = similarity_score(
                ref_area,
                area_of(&cand).and_then(decimal_to_f64),
                ref_price,
                cand.price.and_then(decimal_to_f64),
                distance_km,
                ref_year,
                cand.leto_izgradnje_stavbe,
                reference.energijski_razred.as_deref(),
                cand.energijski_razred.as_deref(),
            );

            SimilarProperty {
                deduplicated_id: cand.deduplicated_id,
                naslov: format_address(
                    cand.ulica.as_deref(),
                    cand.hisna_stevilka.as_deref(),
                    cand.dodatek_hs.as_deref(),
                    cand.naselje.as_deref(),
                    cand.obcina.as_deref(),
                ),
                povrsina: area_of(&cand),
                cena: cand.price,
                leto_izgradnje_stavbe: cand.leto_izgradnje_stavbe,
                energijski_razred: cand.energijski_razred,
                distance_km: (distance_km * 100.0).round() / 100.0,
                similarity_score: (score * 100.0).round() / 100.0,
                obcina: cand.obcina,
                longitude: cand.longitude,
                latitude: cand.latitude,
            }
        })
        .collect();

    scored.sort_by(|a, b| b.similarity_score.partial_cmp(&a.similarity_score).unwrap());
    scored.truncate(limit.max(0) as usize);

    Ok(scored)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_class_index_orders_a_through_g() {
        assert_eq!(energy_class_index("A"), Some(0));
        assert_eq!(energy_class_index("G"), Some(6));
        assert_eq!(energy_class_index("Z"), None);
    }

    #[test]
    fn score_is_100_when_everything_matches_exactly() {
        let s = similarity_score(
            Some(60.0), Some(60.0),
            Some(1200.0), Some(1200.0),
            0.0,
            Some(2000), Some(2000),
            Some("C"), Some("C"),
        );
        assert!((s - 100.0).abs() < 1e-9);
    }

    #[test]
    fn score_stays_in_0_100_with_large_deviations() {
        let s = similarity_score(
            Some(60.0), Some(600.0),
            Some(1200.0), Some(12000.0),
            50.0,
            Some(2000), Some(1900),
            Some("A"), Some("G"),
        );
        assert!((0.0..=100.0).contains(&s));
    }

    #[test]
    fn missing_reference_datum_drops_its_weight() {
        // no price on either side: score should equal a pure location+area score
        let s = similarity_score(
            Some(60.0), Some(60.0),
            None, None,
            0.0,
            None, None,
            None, None,
        );
        assert!((s - 100.0).abs() < 1e-9);
    }

    #[test]
    fn location_score_matches_piecewise_bands() {
        assert_eq!(location_score(0.5), 20.0);
        assert_eq!(location_score(2.0), 15.0);
        assert_eq!(location_score(4.0), 10.0);
        assert!(location_score(10.0) < 10.0);
        assert!(location_score(100.0) >= 0.0);
    }

    #[test]
    fn haversine_zero_distance_for_same_point() {
        assert!((haversine_km(14.5, 46.05, 14.5, 46.05)).abs() < 1e-9);
    }

    #[test]
    fn format_address_dedups_settlement_equal_to_municipality() {
        let addr = format_address(Some("Slovenska"), Some("10"), None, Some("Ljubljana"), Some("Ljubljana"));
        assert_eq!(addr, "Slovenska 10, Ljubljana");
    }

    #[test]
    fn format_address_keeps_distinct_settlement() {
        let addr = format_address(Some("Glavna"), Some("3"), Some("a"), Some("Zasip"), Some("Bled"));
        assert_eq!(addr, "Glavna 3a, Zasip, Bled");
    }

    #[test]
    fn format_address_falls_back_when_empty() {
        assert_eq!(format_address(None, None, None, None, None), "Neznan naslov");
    }
}
