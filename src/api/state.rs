use std::sync::Arc;

use crate::detect::engine::AnomalyEngine;
use crate::config::ServiceConfig;
use crate::detect::incident::AnomalyLog;
use crate::storage::Pool;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AnomalyEngine>,
    pub pool: Pool,
    pub anomalies: Arc<AnomalyLog>,
    /// Page size when `/anomalies` is called without `limit`.
    pub recent_limit: usize,
    /// Upper bound for synthetic training corpora requested over the API.
    pub max_synthetic: usize,
}

impl AppState {
    pub fn new(engine: Arc<AnomalyEngine>, pool: Pool, service: &ServiceConfig) -> Self {
        Self {
            anomalies: Arc::new(AnomalyLog::new(pool.clone())),
            engine,
            pool,
            recent_limit: service.recent_anomaly_limit,
            max_synthetic: service.max_synthetic_samples,
        }
    }
}
