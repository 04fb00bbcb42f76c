use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tenderflow_core::JobStatus;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::scheduler::BatchOptions;
use crate::service::ScraperService;

/// Recurring batch over a fixed platform list. `cron` takes a leading seconds field
/// (`sec min hour day month weekday`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub name: String,
    pub platforms: Vec<String>,
    pub cron: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SchedulesFile {
    #[serde(default)]
    schedules: Vec<ScheduleConfig>,
}

pub fn parse_schedules(text: &str) -> Result<Vec<ScheduleConfig>> {
    let file: SchedulesFile = serde_yaml::from_str(text).context("parsing schedules yaml")?;
    Ok(file.schedules)
}

pub fn load_schedules(path: impl AsRef<Path>) -> Result<Vec<ScheduleConfig>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_schedules(&text).with_context(|| format!("loading {}", path.display()))
}

/// Registers one cron job per enabled schedule. The scheduler is returned unstarted.
pub async fn build_scheduler(
    service: &ScraperService,
    schedules: &[ScheduleConfig],
    options: &BatchOptions,
) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;

    for schedule in schedules {
        if !schedule.enabled {
            info!(schedule = %schedule.name, "schedule disabled, skipping");
            continue;
        }
        for id in &schedule.platforms {
            if service.get_platforms().iter().all(|p| &p.id != id) {
                warn!(schedule = %schedule.name, platform_id = %id, "schedule references unknown platform");
            }
        }

        let service = service.clone();
        let options = options.clone();
        let name = schedule.name.clone();
        let platforms = schedule.platforms.clone();
        let job = Job::new_async(schedule.cron.as_str(), move |_uuid, _lock| {
            let service = service.clone();
            let options = options.clone();
            let name = name.clone();
            let platforms = platforms.clone();
            Box::pin(async move {
                info!(schedule = %name, platforms = platforms.len(), "scheduled batch triggered");
                let outcomes = service.batch_scrape(&platforms, &options).await;
                let completed = outcomes
                    .iter()
                    .filter(|o| o.status() == JobStatus::Completed)
                    .count();
                info!(
                    schedule = %name,
                    completed,
                    unsuccessful = outcomes.len() - completed,
                    "scheduled batch finished"
                );
            })
        })
        .with_context(|| format!("creating job for schedule {} ({})", schedule.name, schedule.cron))?;
        sched.add(job).await.context("adding scheduler job")?;
        info!(schedule = %schedule.name, cron = %schedule.cron, "schedule registered");
    }

    Ok(sched)
}
