use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the dashboard service.
#[derive(Debug, Clone)]
pub struct Settings {
    /// HTTP listen address.
    pub bind: String,

    /// SQLite database file holding findings.
    pub database: PathBuf,

    /// Maximum number of scan jobs executing at once.
    pub workers: usize,

    /// Jobs that may wait in the queue before submissions start waiting.
    pub queue_capacity: usize,

    /// Upper bound for one scanner invocation.
    pub scan_timeout: Duration,

    /// How long finished jobs stay queryable.
    pub job_retention: Duration,

    /// Scanner binary.
    pub nmap_program: PathBuf,

    /// Extra scanner arguments placed before `-oX - <target>`.
    pub nmap_args: Vec<String>,

    /// Directory with static UI assets.
    pub ui_dir: PathBuf,
}

impl Settings {
    /// Eviction sweep period: the retention window, capped at one minute.
    pub fn sweep_interval(&self) -> Duration {
        self.job_retention
            .min(Duration::from_secs(60))
            .max(Duration::from_secs(1))
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5000".into(),
            database: PathBuf::from("vulns.db"),
            workers: 4,
            queue_capacity: 256,
            scan_timeout: Duration::from_secs(300),
            job_retention: Duration::from_secs(24 * 3600),
            nmap_program: PathBuf::from("nmap"),
            nmap_args: Vec::new(),
            ui_dir: PathBuf::from("ui"),
        }
    }
}
