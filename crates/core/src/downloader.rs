// crates/core/src/downloader.rs
//! Description of the external downloader invocation.

use std::path::{Path, PathBuf};

/// Default downloader binary, resolved through `PATH`.
pub const DEFAULT_PROGRAM: &str = "yt-dlp";

/// Progress template that makes the downloader print a bare percentage per line.
pub const PROGRESS_TEMPLATE: &str = "%(progress._percent_str)s";

/// Output file name template, relative to the job's output directory.
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// How to launch the downloader for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderSpec {
    pub program: String,
    /// Placed before the standard arguments, e.g. `["-m", "yt_dlp"]` for a
    /// `python3` program.
    pub leading_args: Vec<String>,
    /// Inserted right before the target.
    pub extra_args: Vec<String>,
    pub downloads_dir: PathBuf,
}

impl Default for DownloaderSpec {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            leading_args: Vec::new(),
            extra_args: Vec::new(),
            downloads_dir: PathBuf::from("./downloads"),
        }
    }
}

impl DownloaderSpec {
    pub fn new(program: impl Into<String>, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            extra_args: Vec::new(),
            downloads_dir: downloads_dir.into(),
        }
    }

    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_extra_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Per-owner subfolder under `downloads_dir`, or `downloads_dir` itself.
    pub fn output_dir(&self, owner_folder: Option<&str>) -> PathBuf {
        match owner_folder.map(str::trim) {
            Some(folder) if !folder.is_empty() => self.downloads_dir.join(folder),
            _ => self.downloads_dir.clone(),
        }
    }

    /// Argument vector for one download.
    pub fn args(&self, output_dir: &Path, target: &str) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.extend([
            "--newline".to_string(),
            "--progress-template".to_string(),
            PROGRESS_TEMPLATE.to_string(),
            "-o".to_string(),
            output_dir.join(OUTPUT_TEMPLATE).to_string_lossy().into_owned(),
        ]);
        args.extend(self.extra_args.iter().cloned());
        args.push(target.to_string());
        args
    }
}
