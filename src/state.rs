use std::sync::Arc;

use crate::config::settings::AppConfig;
use crate::infrastructure::queue::JobQueue;
use crate::infrastructure::storage::ObjectStorage;
use crate::modules::jobs::store::JobStore;
use crate::modules::summary::repository::SummaryStore;
use crate::modules::summary::service::ResultAggregator;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub jobs: Arc<dyn JobStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub queue: Arc<dyn JobQueue>,
    pub aggregator: ResultAggregator,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        jobs: Arc<dyn JobStore>,
        summaries: Arc<dyn SummaryStore>,
        storage: Arc<dyn ObjectStorage>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            config,
            aggregator: ResultAggregator::new(jobs.clone(), summaries),
            jobs,
            storage,
            queue,
        }
    }
}
