pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use sqlx::PgPool;
use std::sync::Arc;

use crate::config::Config;
use crate::database::catalog::PgExamCatalog;
use crate::database::submissions::PgSubmissionStore;
use crate::database::{ExamCatalog, SubmissionStore};
use crate::services::{
    audit_service::{AuditService, AuditSink, PgAuditSink},
    grading_service::GradingEngine,
    staff_service::StaffService,
    submission_service::SubmissionService,
};
use crate::utils::time::{Clock, SystemClock};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub grading: GradingEngine,
    pub submission_service: SubmissionService,
    pub staff_service: StaffService,
}

impl AppState {
    pub fn new(
        config: Config,
        catalog: Arc<dyn ExamCatalog>,
        store: Arc<dyn SubmissionStore>,
        audit_sink: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let audit = AuditService::new(audit_sink);
        let submission_service = SubmissionService::new(
            catalog.clone(),
            store.clone(),
            audit.clone(),
            clock.clone(),
            &config,
        );
        let staff_service =
            StaffService::new(catalog.clone(), store.clone(), audit, clock.clone());
        let grading = GradingEngine::new(catalog, store, clock);

        Self {
            config: Arc::new(config),
            grading,
            submission_service,
            staff_service,
        }
    }

    pub fn with_postgres(config: Config, pool: PgPool) -> Self {
        Self::new(
            config,
            Arc::new(PgExamCatalog::new(pool.clone())),
            Arc::new(PgSubmissionStore::new(pool.clone())),
            Arc::new(PgAuditSink::new(pool)),
            Arc::new(SystemClock),
        )
    }
}
