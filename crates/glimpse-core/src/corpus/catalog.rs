//! Corpus catalog: the ordered identifier list and its asset cross-check.

use crate::config::IDENTIFIER_SUFFIX;
use crate::error::CorpusLoadError;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// How many names of each kind the mismatch warning prints.
const REPORT_SAMPLE: usize = 5;

/// Result of cross-checking the identifier list against the asset directory.
///
/// Purely diagnostic. A non-empty `missing` or `orphaned` never prevents the
/// catalog from loading.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatalogReport {
    /// Number of identifiers in the names file
    pub declared: usize,
    /// Number of files found in the asset directory
    pub on_disk: usize,
    /// Identifiers with no backing file, in catalog order
    pub missing: Vec<String>,
    /// Files with no identifier, sorted by name
    pub orphaned: Vec<String>,
    /// Set when the asset directory could not be listed
    pub listing_error: Option<String>,
}

impl CatalogReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty() && self.orphaned.is_empty() && self.listing_error.is_none()
    }
}

/// Ordered identifiers, index-aligned with the embedding matrix rows.
#[derive(Debug, Clone)]
pub struct CorpusCatalog {
    identifiers: Vec<String>,
    images_dir: PathBuf,
    report: CatalogReport,
}

impl CorpusCatalog {
    /// Loads the identifier list and cross-checks it against `images_dir`.
    ///
    /// Fails only when the names file cannot be read.
    #[instrument(skip_all, fields(names = %names_path.as_ref().display()))]
    pub fn load(
        names_path: impl AsRef<Path>,
        images_dir: impl AsRef<Path>,
    ) -> Result<Self, CorpusLoadError> {
        let names_path = names_path.as_ref();
        let images_dir = images_dir.as_ref();

        let content =
            std::fs::read_to_string(names_path).map_err(|e| CorpusLoadError::Read {
                path: names_path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let identifiers = parse_identifiers(&content);
        let report = cross_check(&identifiers, images_dir);
        log_report(&report, images_dir);

        Ok(Self {
            identifiers,
            images_dir: images_dir.to_path_buf(),
            report,
        })
    }

    /// Builds a catalog without touching the filesystem.
    pub fn from_identifiers(identifiers: Vec<String>, images_dir: impl Into<PathBuf>) -> Self {
        let report = CatalogReport {
            declared: identifiers.len(),
            ..CatalogReport::default()
        };
        Self {
            identifiers,
            images_dir: images_dir.into(),
            report,
        }
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// Identifier for matrix row `row`.
    pub fn get(&self, row: usize) -> Option<&str> {
        self.identifiers.get(row).map(String::as_str)
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    /// Path of the displayable asset for `row`.
    pub fn asset_path(&self, row: usize) -> Option<PathBuf> {
        self.get(row).map(|id| self.images_dir.join(id))
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn report(&self) -> &CatalogReport {
        &self.report
    }
}

/// Splits the names file into identifiers.
///
/// Empty lines are dropped, a trailing `\r` is stripped and the asset suffix
/// is appended. Order is preserved.
pub fn parse_identifiers(content: &str) -> Vec<String> {
    content
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(|line| format!("{}{}", line, IDENTIFIER_SUFFIX))
        .collect()
}

fn cross_check(identifiers: &[String], images_dir: &Path) -> CatalogReport {
    let mut report = CatalogReport {
        declared: identifiers.len(),
        ..CatalogReport::default()
    };

    let on_disk = match list_file_names(images_dir) {
        Ok(names) => names,
        Err(e) => {
            report.listing_error = Some(e.to_string());
            return report;
        }
    };
    report.on_disk = on_disk.len();

    let declared: HashSet<String> = identifiers.iter().map(|id| last_component(id)).collect();

    report.missing = identifiers
        .iter()
        .filter(|id| !on_disk.contains(&last_component(id)))
        .cloned()
        .collect();

    let mut orphaned: Vec<String> = on_disk
        .iter()
        .filter(|name| !declared.contains(*name))
        .cloned()
        .collect();
    orphaned.sort();
    report.orphaned = orphaned;

    report
}

/// File name part of an identifier; identifiers may carry directories.
fn last_component(id: &str) -> String {
    Path::new(id)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| id.to_string())
}

fn list_file_names(dir: &Path) -> std::io::Result<HashSet<String>> {
    let mut names = HashSet::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.insert(name.to_string());
        }
    }
    Ok(names)
}

fn log_report(report: &CatalogReport, images_dir: &Path) {
    if let Some(err) = &report.listing_error {
        warn!(
            "Could not list asset directory {}: {}",
            images_dir.display(),
            err
        );
        return;
    }

    if report.is_consistent() {
        info!(
            "Catalog has {} identifiers, all backed by assets",
            report.declared
        );
        return;
    }

    if !report.missing.is_empty() {
        warn!(
            "{} identifiers have no asset file (e.g. {:?})",
            report.missing.len(),
            &report.missing[..report.missing.len().min(REPORT_SAMPLE)]
        );
    }
    if !report.orphaned.is_empty() {
        warn!(
            "{} asset files are not listed in the catalog (e.g. {:?})",
            report.orphaned.len(),
            &report.orphaned[..report.orphaned.len().min(REPORT_SAMPLE)]
        );
    }
}
