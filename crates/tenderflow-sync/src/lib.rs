//! Job orchestration: platform registry, job tracking, paced batches, health and export.

pub mod config;
pub mod export;
pub mod health;
pub mod jobs;
pub mod registry;
pub mod schedule;
pub mod scheduler;
pub mod service;

pub use config::ServiceConfig;
pub use export::{export_tenders, ExportFormat, ExportManifest, ExportManifestFile};
pub use health::HealthMonitor;
pub use jobs::{JobStats, JobTracker, JobUpdate};
pub use registry::PlatformRegistry;
pub use schedule::{build_scheduler, load_schedules, parse_schedules, ScheduleConfig};
pub use scheduler::{BatchCancel, BatchOptions, BatchOutcome, BatchScheduler, JobSummary, ScrapeError};
pub use service::ScraperService;

pub const CRATE_NAME: &str = "tenderflow-sync";
