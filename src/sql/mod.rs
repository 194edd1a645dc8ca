//! Named SQL template loader (C1).
//!
//! Templates used by the ingestion transform, deduplication, and statistics
//! stages are compiled into the binary with `rust_embed` rather than read
//! from the filesystem at runtime, so a deployed binary never depends on a
//! sibling `sql/` directory existing on disk.

use rust_embed::RustEmbed;

use crate::error::AppError;

#[derive(RustEmbed)]
#[folder = "src/sql/templates"]
struct Templates;

/// Look up a named SQL template by its path relative to `src/sql/templates`
/// (e.g. `"np_posel_transform.sql"`, `"stats/create_mv_prodajne_stats.sql"`).
pub fn load(name: &str) -> Result<String, AppError> {
    let file = Templates::get(name).ok_or_else(|| {
        AppError::Internal(anyhow::anyhow!("missing embedded SQL template: {name}"))
    })?;
    String::from_utf8(file.data.into_owned())
        .map_err(|e| AppError::Internal(anyhow::anyhow!("SQL template {name} is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_known_templates() {
        for name in [
            "np_posel_transform.sql",
            "kpp_posel_transform.sql",
            "np_del_stavbe_transform.sql",
            "kpp_del_stavbe_transform.sql",
            "np_del_stavbe_deduplication.sql",
            "kpp_del_stavbe_deduplication.sql",
            "dodaj_ei_deduplication.sql",
            "ei_insert.sql",
            "stats/create_mv_prodajne_stats.sql",
            "stats/create_mv_najemne_stats.sql",
            "stats/create_mv_prodajne_stats_12m.sql",
            "stats/create_mv_najemne_stats_12m.sql",
            "populate_statistike_cache.sql",
            "populate_statistike_cache_12m.sql",
        ] {
            let sql = load(name).unwrap_or_else(|e| panic!("failed to load {name}: {e}"));
            assert!(!sql.trim().is_empty(), "{name} should not be empty");
        }
    }

    #[test]
    fn unknown_template_errors() {
        assert!(load("does_not_exist.sql").is_err());
    }
}
