//! Files written from run results.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use log::info;

use crate::error::{ArtifactError, Result};
use crate::fleet::RunResult;
use crate::runner::{CommandClass, CompletionStatus};

/// Directory for configuration dumps, under the output root.
pub const CONFIG_DIR: &str = "config";

/// Directory for log analyses, under the output root.
pub const ANALYSIS_DIR: &str = "AI_analysis";

/// Replace every character outside `[A-Za-z0-9_.-]` (Unicode word
/// characters included) with `_`.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// The streaming capture of a log workflow, if it holds anything.
pub fn log_body(result: &RunResult) -> Option<&str> {
    result
        .outputs
        .iter()
        .find(|o| o.spec.class == CommandClass::Streaming)
        .map(|o| o.raw.as_str())
        .filter(|raw| !raw.trim().is_empty())
}

/// Writes artifacts below one output root, stamped with one date.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
    date: NaiveDate,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>, date: NaiveDate) -> Self {
        Self {
            root: root.into(),
            date,
        }
    }

    /// Writer stamped with the local date.
    pub fn today(root: impl Into<PathBuf>) -> Self {
        Self::new(root, chrono::Local::now().date_naive())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Date formatted the way file names carry it.
    pub fn date_stamp(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    /// Create `<root>/<name>` if needed.
    pub fn ensure_dir(&self, name: &str) -> Result<PathBuf> {
        let dir = self.root.join(name);
        fs::create_dir_all(&dir).map_err(|source| ArtifactError::Write {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    fn write(&self, path: &Path, contents: &str) -> Result<()> {
        fs::write(path, contents).map_err(|source| {
            ArtifactError::Write {
                path: path.to_path_buf(),
                source,
            }
            .into()
        })
    }

    /// `config/<identity>_<address>_<date>_Output.txt` with one section per
    /// captured command. Commands that never produced a read are skipped.
    pub fn write_config_dump(&self, result: &RunResult) -> Result<PathBuf> {
        let dir = self.ensure_dir(CONFIG_DIR)?;
        let path = dir.join(format!(
            "{}_{}_{}_Output.txt",
            sanitize_filename(result.label()),
            sanitize_filename(result.device.address()),
            self.date_stamp()
        ));

        let contents: String = result
            .outputs
            .iter()
            .filter(|output| !matches!(output.status, CompletionStatus::Error(_)))
            .map(|output| format!("=== Command: {} ===\n\n{}\n\n", output.spec.command, output.raw))
            .collect();

        self.write(&path, &contents)?;
        info!("{}: configuration saved to {}", result.device, path.display());
        Ok(path)
    }

    /// `AI_analysis/<identity>_<address>_<date>_AI_Analysis.txt` holding the
    /// log, a short header and the summary.
    pub fn write_log_analysis(&self, result: &RunResult, log: &str, summary: &str) -> Result<PathBuf> {
        let dir = self.ensure_dir(ANALYSIS_DIR)?;
        let date = self.date_stamp();
        let path = dir.join(format!(
            "{}_{}_{}_AI_Analysis.txt",
            sanitize_filename(result.label()),
            sanitize_filename(result.device.address()),
            date
        ));

        let contents = format!(
            "=== Log content: ===\n {} \n=== Device name: {} ===\n=== Device address: {} ===\n=== Analysis date: {} ===\n\n{}",
            log,
            result.label(),
            result.device.address(),
            date,
            summary
        );

        self.write(&path, &contents)?;
        info!("{}: analysis saved to {}", result.device, path.display());
        Ok(path)
    }
}
