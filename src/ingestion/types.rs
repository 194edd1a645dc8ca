//! Core data types shared by the ingestion pipeline.
//! Pure data structures with no behavior.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw data from various sources - tagged unions.
#[derive(Debug)]
pub enum RawData {
    File(PathBuf),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Csv(String),
}

impl RawData {
    pub fn as_file_path(&self) -> anyhow::Result<&PathBuf> {
        match self {
            RawData::File(path) => Ok(path),
            _ => Err(anyhow::anyhow!("Expected File, got {:?}", self)),
        }
    }

    pub fn as_bytes(&self) -> anyhow::Result<&[u8]> {
        match self {
            RawData::Bytes(bytes) => Ok(bytes),
            _ => Err(anyhow::anyhow!("Expected Bytes, got {:?}", self)),
        }
    }

    pub fn as_json(&self) -> anyhow::Result<&serde_json::Value> {
        match self {
            RawData::Json(json) => Ok(json),
            _ => Err(anyhow::anyhow!("Expected Json, got {:?}", self)),
        }
    }
}

/// One rental or purchase contract (`posel`). Carries the fields common to
/// both families; dataset-specific price fields (`najemnina` vs `cena`) are
/// kept apart since they differ in shape (rent also tracks whether costs and
/// VAT are included).
#[derive(Debug, Clone)]
pub struct Deal {
    pub posel_id: i64,
    pub vrsta_posla: Option<String>,
    pub datum_uveljavitve: Option<NaiveDate>,
    pub datum_sklenitve: Option<NaiveDate>,
    pub cena: Option<Decimal>,
    pub vkljuceno_stroski: Option<bool>,
    pub vkljuceno_ddv: Option<bool>,
    pub stopnja_ddv: Option<Decimal>,
    pub trznost_posla: Option<String>,
    pub leto: i32,
}

/// One transacted building part (`del_stavbe`), either rented or sold.
#[derive(Debug, Clone)]
pub struct BuildingPart {
    pub del_stavbe_id: i64,
    pub posel_id: i64,
    pub sifra_ko: i32,
    pub stevilka_stavbe: Option<i32>,
    pub stevilka_dela_stavbe: Option<i32>,
    pub dejanska_raba: Option<String>,
    pub obcina: Option<String>,
    pub naselje: Option<String>,
    pub ulica: Option<String>,
    pub hisna_stevilka: Option<String>,
    pub dodatek_hs: Option<String>,
    pub povrsina_uradna: Option<Decimal>,
    pub povrsina_uporabna: Option<Decimal>,
    pub leto_izgradnje_stavbe: Option<i32>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub leto: i32,
}

/// One issued energy-performance certificate.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EnergyCertificate {
    pub id: i64,
    pub ei_id: String,
    pub datum_izdelave: Option<NaiveDate>,
    pub velja_do: Option<NaiveDate>,
    pub sifra_ko: i32,
    pub stevilka_stavbe: Option<i32>,
    pub stevilka_dela_stavbe: Option<i32>,
    pub tip_izkaznice: Option<String>,
    pub potrebna_toplota_ogrevanje: Option<Decimal>,
    pub dovedena_energija_delovanje: Option<Decimal>,
    pub celotna_energija: Option<Decimal>,
    pub dovedena_elektricna_energija: Option<Decimal>,
    pub primarna_energija: Option<Decimal>,
    pub emisije_co2: Option<Decimal>,
    pub kondicionirana_povrsina: Option<Decimal>,
    pub energijski_razred: Option<String>,
    pub epbd_tip: Option<String>,
}

/// A raw row of the pipe-delimited EI register CSV, after column renaming
/// but before type normalization. Kept as strings so the cleaning stage can
/// apply the comma-decimal / thousands-dot normalization uniformly.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEnergyCertificateRow {
    pub ei_id: Option<String>,
    pub datum_izdelave: Option<String>,
    pub velja_do: Option<String>,
    pub sifra_ko: Option<String>,
    pub stevilka_stavbe: Option<String>,
    pub stevilka_dela_stavbe: Option<String>,
    pub tip_izkaznice: Option<String>,
    pub potrebna_toplota_ogrevanje: Option<String>,
    pub dovedena_energija_delovanje: Option<String>,
    pub celotna_energija: Option<String>,
    pub dovedena_elektricna_energija: Option<String>,
    pub primarna_energija: Option<String>,
    pub emisije_co2: Option<String>,
    pub kondicionirana_povrsina: Option<String>,
    pub energijski_razred: Option<String>,
    pub epbd_tip: Option<String>,
}

/// Canonical deduplicated building-part row, as read back for the details
/// and similarity endpoints.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeduplicatedBuildingPart {
    pub deduplicated_id: i64,
    pub sifra_ko: i32,
    pub stevilka_stavbe: Option<i32>,
    pub stevilka_dela_stavbe: Option<i32>,
    pub dejanska_raba: Option<String>,
    pub obcina: Option<String>,
    pub naselje: Option<String>,
    pub ulica: Option<String>,
    pub hisna_stevilka: Option<String>,
    pub dodatek_hs: Option<String>,
    pub povrsina_uradna: Option<Decimal>,
    pub povrsina_uporabna: Option<Decimal>,
    pub leto_izgradnje_stavbe: Option<i32>,
    pub zadnja_cena: Option<Decimal>,
    pub zadnje_leto: Option<i32>,
    pub energijski_razred: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub povezani_del_stavbe_ids: Vec<i64>,
    pub povezani_posel_ids: Vec<i64>,
    pub najnovejsi_del_stavbe_id: Option<i64>,
    pub energetske_izkaznice: Vec<i64>,
}

/// Write operation statistics, reported by every bulk-insert stage.
#[derive(Debug, Default, Clone)]
pub struct WriteStats {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl std::fmt::Display for WriteStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inserted: {}, updated: {}, skipped: {}, errors: {}",
            self.inserted, self.updated, self.skipped, self.errors
        )
    }
}
