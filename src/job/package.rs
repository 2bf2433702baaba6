//! Job-package handling on the Manager's local disk.
//!
//! Layout under the jobs directory:
//!
//! ```text
//! Jobs/<pkg>.zip              optional; job.json at the archive root
//! Jobs/<pkg>/config/job.json  canonical on-disk config
//! ```
//!
//! The `config/` directory doubles as the extraction marker: once it exists
//! the archive is never touched again, so a broken package surfaces one
//! error instead of one per cycle.

use std::fs;
use std::path::Path;

use zip::ZipArchive;

use crate::error::{Result, SwiftError};
use crate::job::JobConfig;

pub const CONFIG_FILE: &str = "job.json";

/// Extract `job.json` out of every archive that has no config directory yet.
pub fn prepare_packages(jobs_dir: &Path) -> Result<()> {
    if !jobs_dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(jobs_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("zip") {
            continue;
        }
        let Some(package) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let config_dir = jobs_dir.join(&package).join("config");
        if config_dir.exists() {
            continue;
        }
        fs::create_dir_all(&config_dir)?;
        extract_config(&path, &config_dir).map_err(|reason| {
            SwiftError::JobPackageConfigExtract {
                package: package.clone(),
                reason,
            }
        })?;
        tracing::info!(package = %package, "Extracted job package config");
    }
    Ok(())
}

fn extract_config(archive_path: &Path, config_dir: &Path) -> std::result::Result<(), String> {
    let file = fs::File::open(archive_path).map_err(|e| e.to_string())?;
    let mut archive = ZipArchive::new(file).map_err(|e| e.to_string())?;
    let mut entry = archive
        .by_name(CONFIG_FILE)
        .map_err(|e| format!("missing {CONFIG_FILE}: {e}"))?;
    let mut out =
        fs::File::create(config_dir.join(CONFIG_FILE)).map_err(|e| e.to_string())?;
    std::io::copy(&mut entry, &mut out).map_err(|e| e.to_string())?;
    Ok(())
}

/// Load `config/job.json` from every immediate subdirectory, sorted by name.
///
/// The on-disk file is a bare [`JobConfig`] (no wire envelope); malformed
/// files are logged and skipped for the cycle.
pub fn scan_configs(jobs_dir: &Path) -> Result<Vec<JobConfig>> {
    let mut configs = Vec::new();
    if !jobs_dir.is_dir() {
        return Ok(configs);
    }
    for entry in fs::read_dir(jobs_dir)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let file = path.join("config").join(CONFIG_FILE);
        if !file.is_file() {
            continue;
        }
        let raw = fs::read_to_string(&file)?;
        match serde_json::from_str::<JobConfig>(&raw) {
            Ok(config) => configs.push(config),
            Err(err) => {
                tracing::warn!(path = %file.display(), error = %err, "Skipping malformed job config file");
            }
        }
    }
    configs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(configs)
}

/// Overwrite the canonical on-disk config for a job.
pub fn write_disk_config(jobs_dir: &Path, config: &JobConfig) -> Result<()> {
    let dir = jobs_dir.join(&config.name).join("config");
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(CONFIG_FILE), serde_json::to_string_pretty(config)?)?;
    Ok(())
}
