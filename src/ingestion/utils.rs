//! Utility functions for common ingestion operations.

use crate::error::AppError;
use reqwest::Client;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Download a file via HTTP, returning its raw bytes.
pub async fn http_get(url: &str, timeout: Duration) -> Result<Vec<u8>, AppError> {
    info!(url, "downloading");
    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(e.into()))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    let status = response.status();

    if !status.is_success() {
        return Err(AppError::RemoteFormatError(format!(
            "HTTP request to {url} failed: {status}"
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    info!(bytes = bytes.len(), "downloaded");
    Ok(bytes.to_vec())
}

/// Extract the three register CSVs from a downloaded zip archive, matched by
/// case-insensitive filename substring: `sifranti`, `posli`, `delistavb`.
/// Any substring not found in the archive is a `MissingFileError`.
pub fn extract_register_csvs(
    zip_path: &Path,
    output_dir: &Path,
) -> Result<HashMap<&'static str, PathBuf>, AppError> {
    let file = fs::File::open(zip_path).map_err(|e| AppError::Internal(e.into()))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| AppError::BadArchiveError(format!("not a valid zip: {e}")))?;

    let markers: [(&'static str, &str); 3] =
        [("sifranti", "sifranti"), ("posli", "posli"), ("delistavb", "delistavb")];
    let mut found: HashMap<&'static str, PathBuf> = HashMap::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| AppError::BadArchiveError(e.to_string()))?;
        let filename = entry.name().to_string();
        let lower = filename.to_lowercase();

        for (key, substr) in markers.iter() {
            if found.contains_key(key) {
                continue;
            }
            if lower.contains(substr) {
                let output_path = output_dir.join(
                    Path::new(&filename)
                        .file_name()
                        .unwrap_or_else(|| std::ffi::OsStr::new(&filename)),
                );
                let mut output_file =
                    fs::File::create(&output_path).map_err(|e| AppError::Internal(e.into()))?;
                io::copy(&mut entry, &mut output_file).map_err(|e| AppError::Internal(e.into()))?;
                info!(file = %filename, marker = key, "extracted register csv");
                found.insert(key, output_path);
                break;
            }
        }
    }

    for (key, _) in markers.iter() {
        if !found.contains_key(key) {
            return Err(AppError::MissingFileError(format!(
                "no file matching '*{key}*' in archive"
            )));
        }
    }

    Ok(found)
}

/// Verify a downloaded file is a well-formed zip archive without fully
/// extracting it.
pub fn validate_zip(path: &Path) -> Result<(), AppError> {
    let file = fs::File::open(path).map_err(|e| AppError::Internal(e.into()))?;
    zip::ZipArchive::new(file).map_err(|e| AppError::BadArchiveError(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn build_register_zip(path: &Path) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let opts: FileOptions = FileOptions::default();
        writer.start_file("NP_SIFRANTI_2024.csv", opts).unwrap();
        writer.write_all(b"sifra,opis\n1,a\n").unwrap();
        writer.start_file("NP_POSLI_2024.csv", opts).unwrap();
        writer.write_all(b"id_posla\n1\n").unwrap();
        writer.start_file("NP_DELISTAVB_2024.csv", opts).unwrap();
        writer.write_all(b"id_dela_stavbe\n1\n").unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn extracts_all_three_register_csvs() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("archive.zip");
        build_register_zip(&zip_path);

        let found = extract_register_csvs(&zip_path, temp.path()).unwrap();
        assert_eq!(found.len(), 3);
        for key in ["sifranti", "posli", "delistavb"] {
            assert!(found[key].exists());
        }
    }

    #[test]
    fn missing_marker_is_missing_file_error() {
        let temp = tempfile::tempdir().unwrap();
        let zip_path = temp.path().join("archive.zip");
        let file = fs::File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let opts: FileOptions = FileOptions::default();
        writer.start_file("NP_SIFRANTI_2024.csv", opts).unwrap();
        writer.write_all(b"sifra\n1\n").unwrap();
        writer.finish().unwrap();

        let err = extract_register_csvs(&zip_path, temp.path()).unwrap_err();
        assert!(matches!(err, AppError::MissingFileError(_)));
    }

    #[test]
    fn invalid_archive_is_bad_archive_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("not-a-zip.zip");
        fs::write(&path, b"not a zip file").unwrap();

        let err = validate_zip(&path).unwrap_err();
        assert!(matches!(err, AppError::BadArchiveError(_)));
    }
}
