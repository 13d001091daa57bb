//! JSON-lines log of per-episode rewards.
//!
//! One object per line: `{"episode":0,"total_reward":-0.42,"steps":43,"terminated":true}`.

use crate::episode::EpisodeReport;
use gymcraft_vm::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct RewardLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl RewardLog {
    /// Create (or truncate) the log at `path`
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| {
            Error::from(e)
                .with_operation("reward_log::create")
                .with_context("path", path.display().to_string())
        })?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Open the log at `path` for appending
    pub fn append(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path).map_err(|e| {
            Error::from(e)
                .with_operation("reward_log::append")
                .with_context("path", path.display().to_string())
        })?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one line and flush, so the log survives an aborted run
    pub fn record(&mut self, report: &EpisodeReport) -> Result<()> {
        let line = serde_json::to_string(report).map_err(|e| {
            Error::serialization_failed("episode report could not be encoded")
                .with_operation("reward_log::record")
                .set_source(e)
        })?;
        writeln!(self.writer, "{}", line)
            .and_then(|_| self.writer.flush())
            .map_err(|e| Error::from(e).with_operation("reward_log::record"))
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Vec<EpisodeReport>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::from(e)
                .with_operation("reward_log::read")
                .with_context("path", path.display().to_string())
        })?;

        let mut reports = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| Error::from(e).with_operation("reward_log::read"))?;
            if line.trim().is_empty() {
                continue;
            }
            let report = serde_json::from_str(&line).map_err(|e| {
                Error::parse_failed("reward log line is not an episode report")
                    .with_operation("reward_log::read")
                    .with_context("line", (index + 1).to_string())
                    .set_source(e)
            })?;
            reports.push(report);
        }
        Ok(reports)
    }
}
