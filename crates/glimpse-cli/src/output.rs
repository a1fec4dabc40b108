//! Output formatting for search results and corpus checks.
//!
//! Supports both human-readable terminal output and JSON for scripting.

use glimpse_core::corpus::CatalogReport;
use glimpse_core::SearchHit;
use serde::Serialize;
use std::path::Path;

/// How many missing/orphaned names the human report lists.
const REPORT_SAMPLE: usize = 10;

/// JSON output structure for search results
#[derive(Serialize)]
pub struct JsonOutput<'a> {
    pub query: &'a str,
    pub results: Vec<JsonHit<'a>>,
}

/// One hit in JSON format
#[derive(Serialize)]
pub struct JsonHit<'a> {
    pub rank: usize,
    pub identifier: &'a str,
    /// Absolute or data-dir relative path of the asset
    pub path: String,
    pub score: Option<f32>,
}

/// Formats search results as JSON.
pub fn format_json(query: &str, images_dir: &Path, hits: &[SearchHit]) -> String {
    let output = JsonOutput {
        query,
        results: hits
            .iter()
            .enumerate()
            .map(|(i, hit)| JsonHit {
                rank: i + 1,
                identifier: &hit.identifier,
                path: images_dir.join(&hit.identifier).display().to_string(),
                score: hit.score,
            })
            .collect(),
    };
    serde_json::to_string_pretty(&output).unwrap_or_else(|_| "{}".to_string())
}

/// Formats search results for human-readable terminal output.
pub fn format_human(query: &str, images_dir: &Path, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results found for \"{}\"", query);
    }

    let mut output = format!(
        "Found {} result{} for \"{}\":\n\n",
        hits.len(),
        if hits.len() == 1 { "" } else { "s" },
        query
    );

    for (i, hit) in hits.iter().enumerate() {
        match hit.score {
            Some(score) => output.push_str(&format!(
                "{:>3}. {} (score: {:.3})\n",
                i + 1,
                hit.identifier,
                score
            )),
            None => output.push_str(&format!("{:>3}. {}\n", i + 1, hit.identifier)),
        }
        output.push_str(&format!(
            "     {}\n",
            images_dir.join(&hit.identifier).display()
        ));
    }

    output.trim_end().to_string()
}

/// Corpus shape plus the catalog cross-check, for `glimpse check`.
#[derive(Serialize)]
pub struct CheckOutput<'a> {
    pub rows: u32,
    pub columns: u32,
    pub identifiers: usize,
    pub report: &'a CatalogReport,
}

impl CheckOutput<'_> {
    /// Whether the catalog, matrix and asset directory all agree.
    pub fn is_consistent(&self) -> bool {
        self.identifiers == self.rows as usize && self.report.is_consistent()
    }
}

pub fn format_check_json(check: &CheckOutput<'_>) -> String {
    serde_json::to_string_pretty(check).unwrap_or_else(|_| "{}".to_string())
}

pub fn format_check_human(check: &CheckOutput<'_>) -> String {
    let report = check.report;
    let mut output = format!(
        "Matrix: {} rows x {} columns\nIdentifiers: {}\nFiles on disk: {}\n",
        check.rows, check.columns, check.identifiers, report.on_disk
    );

    if check.identifiers != check.rows as usize {
        output.push_str(&format!(
            "Row count mismatch: {} identifiers for {} matrix rows\n",
            check.identifiers, check.rows
        ));
    }
    if let Some(err) = &report.listing_error {
        output.push_str(&format!("Could not list assets: {}\n", err));
    }
    push_sample(&mut output, "Missing files", &report.missing);
    push_sample(&mut output, "Orphaned files", &report.orphaned);

    if check.is_consistent() {
        output.push_str("OK\n");
    }
    output.trim_end().to_string()
}

fn push_sample(output: &mut String, label: &str, names: &[String]) {
    if names.is_empty() {
        return;
    }
    output.push_str(&format!("{} ({}):\n", label, names.len()));
    for name in names.iter().take(REPORT_SAMPLE) {
        output.push_str(&format!("  {}\n", name));
    }
    if names.len() > REPORT_SAMPLE {
        output.push_str(&format!("  ... and {} more\n", names.len() - REPORT_SAMPLE));
    }
}
