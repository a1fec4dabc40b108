//! Path resolution for the CLI.
//!
//! Both directories resolve in the same order: command-line flag, then
//! environment variable. The data directory finally falls back to the
//! platform data location.

use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use glimpse_core::config::CorpusPaths;
use glimpse_core::embedding::ClipModelFiles;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable for the corpus directory
pub const DATA_DIR_ENV: &str = "GLIMPSE_DATA_DIR";

/// Environment variable for the CLIP model directory
pub const MODEL_DIR_ENV: &str = "GLIMPSE_MODEL_DIR";

/// Returns the corpus directory.
///
/// Platform fallback:
/// - macOS: `~/Library/Application Support/dev.glimpse.Glimpse/`
/// - Linux: `~/.local/share/glimpse/`
/// - Windows: `%APPDATA%\glimpse\Glimpse\data\`
pub fn data_dir(flag: Option<&Path>) -> Result<PathBuf> {
    resolve_data_dir(flag, std::env::var_os(DATA_DIR_ENV))
}

fn resolve_data_dir(flag: Option<&Path>, env: Option<OsString>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = env.filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    ProjectDirs::from("dev", "glimpse", "Glimpse")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .ok_or_else(|| anyhow!("Could not determine data directory; pass --data-dir"))
}

/// Returns the CLIP model directory.
pub fn model_dir(flag: Option<&Path>) -> Result<PathBuf> {
    resolve_model_dir(flag, std::env::var_os(MODEL_DIR_ENV))
}

fn resolve_model_dir(flag: Option<&Path>, env: Option<OsString>) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir.to_path_buf());
    }
    env.filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("No model directory; pass --model-dir or set ${}", MODEL_DIR_ENV))
}

/// Corpus file layout, checking that the required files exist.
pub fn corpus_paths(data_dir: &Path) -> Result<CorpusPaths> {
    let paths = CorpusPaths::in_dir(data_dir);
    for required in [&paths.names, &paths.matrix] {
        if !required.exists() {
            return Err(anyhow!(
                "Corpus file not found: {}\nExpected a corpus under {}",
                required.display(),
                data_dir.display()
            ));
        }
    }
    Ok(paths)
}

/// CLIP checkpoint and tokenizer, checking that both exist.
pub fn model_files(model_dir: &Path) -> Result<ClipModelFiles> {
    let files = ClipModelFiles::in_dir(model_dir);
    for required in [&files.weights, &files.tokenizer] {
        if !required.exists() {
            return Err(anyhow!("Model file not found: {}", required.display()));
        }
    }
    Ok(files)
}
