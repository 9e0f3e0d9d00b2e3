// crates/server/src/config.rs
//! Command-line and environment configuration for the `mediaferry` binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use mediaferry_core::{DownloaderSpec, OwnerId, DEFAULT_PROGRAM};
use mediaferry_observability::{LogConfig, LogFormat};

use crate::jobs::CoordinatorOptions;
use crate::scheduler::ScheduleConfig;

#[derive(Debug, Clone, Parser)]
#[command(name = "mediaferry", version, about = "Media download job server")]
pub struct Config {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Address to bind.
    #[arg(long, env = "MEDIAFERRY_BIND", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub bind: IpAddr,

    /// SQLite database file.
    #[arg(long, env = "DB_PATH", default_value = "./data/mediaferry.db")]
    pub db_path: PathBuf,

    /// Root directory for downloaded files.
    #[arg(long, env = "DOWNLOADS_DIR", default_value = "./downloads")]
    pub downloads_dir: PathBuf,

    /// Downloader executable.
    #[arg(long, env = "MEDIAFERRY_DOWNLOADER", default_value = DEFAULT_PROGRAM)]
    pub downloader: String,

    /// Extra argument passed to the downloader before the target (repeatable).
    #[arg(long = "downloader-arg", allow_hyphen_values = true)]
    pub downloader_args: Vec<String>,

    /// Kill the downloader when its job is cancelled.
    #[arg(long, env = "MEDIAFERRY_TERMINATE_ON_CANCEL")]
    pub terminate_on_cancel: bool,

    /// Submit the scheduled targets every N hours.
    #[arg(long, env = "MEDIAFERRY_SCHEDULE_HOURS")]
    pub schedule_interval_hours: Option<u64>,

    /// Target submitted on every scheduled tick (repeatable).
    #[arg(
        long = "schedule-target",
        env = "MEDIAFERRY_SCHEDULE_TARGETS",
        value_delimiter = ','
    )]
    pub schedule_targets: Vec<String>,

    /// Owner of scheduled jobs.
    #[arg(long, env = "MEDIAFERRY_SCHEDULE_OWNER", default_value_t = 1)]
    pub schedule_owner: OwnerId,

    /// stderr log format: compact or json.
    #[arg(long, env = "MEDIAFERRY_LOG_FORMAT", default_value = "compact")]
    pub log_format: LogFormat,

    /// Also write daily rolling JSON logs here.
    #[arg(long, env = "MEDIAFERRY_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            format: self.log_format,
            log_dir: self.log_dir.clone(),
        }
    }

    pub fn downloader_spec(&self) -> DownloaderSpec {
        DownloaderSpec::new(&self.downloader, &self.downloads_dir)
            .with_extra_args(self.downloader_args.iter().cloned())
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            downloader: self.downloader_spec(),
            terminate_on_cancel: self.terminate_on_cancel,
        }
    }

    /// `None` unless both an interval and at least one target are set.
    pub fn schedule(&self) -> Option<ScheduleConfig> {
        let hours = self.schedule_interval_hours.filter(|h| *h > 0)?;
        let targets: Vec<String> = self
            .schedule_targets
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if targets.is_empty() {
            return None;
        }
        Some(ScheduleConfig {
            interval: Duration::from_secs(hours * 3600),
            owner: self.schedule_owner,
            targets,
        })
    }
}
