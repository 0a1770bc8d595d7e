use crate::config::AppConfig;
use anyhow::Result;
use researchcrew_core::{ReportWriter, ResearchCrew, Settings};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Clone)]
pub struct AppState {
    crew: Arc<ResearchCrew>,
    writer: Arc<ReportWriter>,
    limiter: Arc<Semaphore>,
    max_concurrency: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RunMetrics {
    pub max_concurrency: usize,
    pub running: usize,
    pub available_permits: usize,
}

impl AppState {
    pub fn new(crew: ResearchCrew, writer: ReportWriter, max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            crew: Arc::new(crew),
            writer: Arc::new(writer),
            limiter: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    /// State backed by the real chat API and search services.
    pub fn try_new(config: &AppConfig, settings: &Settings) -> Result<Self> {
        let crew = ResearchCrew::from_settings(settings)?;
        let writer = ReportWriter::new(&settings.reports_dir);
        Ok(Self::new(crew, writer, config.max_concurrency))
    }

    pub fn crew(&self) -> &ResearchCrew {
        &self.crew
    }

    pub fn writer(&self) -> Arc<ReportWriter> {
        self.writer.clone()
    }

    /// Claim a run slot without waiting; `None` when all slots are taken.
    pub fn try_start_run(&self) -> Option<OwnedSemaphorePermit> {
        self.limiter.clone().try_acquire_owned().ok()
    }

    pub fn metrics(&self) -> RunMetrics {
        let available_permits = self.limiter.available_permits();
        RunMetrics {
            max_concurrency: self.max_concurrency,
            running: self.max_concurrency.saturating_sub(available_permits),
            available_permits,
        }
    }
}
