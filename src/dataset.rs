//! Typed dataset descriptor.
//!
//! Design Notes §9 ("Dynamic dispatch on `data_source`") calls out that the
//! original picks table names and price-column identity by a string branch
//! at every call site. We replace that with a single `Dataset` enum plus a
//! small descriptor carrying the table-name and price-column facts each
//! call site actually needs, so the branch happens exactly once per request
//! (at parse time) rather than being repeated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    /// Rental register.
    Np,
    /// Sale register.
    Kpp,
}

impl Dataset {
    pub fn table_prefix(self) -> &'static str {
        match self {
            Dataset::Np => "np",
            Dataset::Kpp => "kpp",
        }
    }

    /// Column on the deduplicated table holding the "last" transacted price.
    pub fn price_column(self) -> &'static str {
        match self {
            Dataset::Np => "zadnja_najemnina",
            Dataset::Kpp => "zadnja_cena",
        }
    }

    pub fn del_stavbe_table(self) -> String {
        format!("{}_del_stavbe", self.table_prefix())
    }

    pub fn posel_table(self) -> String {
        format!("{}_posel", self.table_prefix())
    }

    pub fn deduplicated_table(self) -> String {
        format!("{}_del_stavbe_deduplicated", self.table_prefix())
    }

    pub fn all() -> [Dataset; 2] {
        [Dataset::Np, Dataset::Kpp]
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_prefix())
    }
}

impl FromStr for Dataset {
    type Err = crate::error::AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "np" => Ok(Dataset::Np),
            "kpp" => Ok(Dataset::Kpp),
            other => Err(crate::error::AppError::BadRequest(format!(
                "unknown data_source '{other}', expected 'np' or 'kpp'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_datasets_case_insensitively() {
        assert_eq!("NP".parse::<Dataset>().unwrap(), Dataset::Np);
        assert_eq!("kpp".parse::<Dataset>().unwrap(), Dataset::Kpp);
    }

    #[test]
    fn rejects_unknown_dataset() {
        assert!("vsi".parse::<Dataset>().is_err());
    }

    #[test]
    fn price_column_differs_by_dataset() {
        assert_eq!(Dataset::Np.price_column(), "zadnja_najemnina");
        assert_eq!(Dataset::Kpp.price_column(), "zadnja_cena");
    }

    #[test]
    fn table_names_follow_prefix() {
        assert_eq!(Dataset::Np.deduplicated_table(), "np_del_stavbe_deduplicated");
        assert_eq!(Dataset::Kpp.del_stavbe_table(), "kpp_del_stavbe");
    }
}
