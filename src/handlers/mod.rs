use crate::{
    config::Config,
    services::{
        extraction::ExtractionService, metrics::MetricsService, mirror::QuotaMirror,
        quota::QuotaService, tracking::TrackingService,
    },
    store::QuotaStore,
};
use std::sync::Arc;

pub mod convert;
pub mod docs;
pub mod health;
pub mod metrics;
pub mod statistics;
pub mod users;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn QuotaStore>,
    pub quota: QuotaService,
    pub mirror: QuotaMirror,
    pub tracking: TrackingService,
    pub extraction: ExtractionService,
    pub metrics: Arc<MetricsService>,
}
