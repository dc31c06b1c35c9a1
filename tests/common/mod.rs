use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::MigratorTrait;
use tokio::sync::mpsc;
use uuid::Uuid;

use tutorhub_api::{
    config::AppConfig,
    entities::slot::SlotKind,
    events::EventSender,
    handlers::AppServices,
    migrator::Migrator,
    services::slots::CreateSlotInput,
};

/// Service bundle backed by a fresh in-memory SQLite database.
///
/// A single pooled connection keeps the in-memory database alive and shared;
/// concurrent callers serialize on it, which is enough to exercise the
/// storage-enforced invariants.
pub struct TestCtx {
    #[allow(dead_code)]
    pub db: Arc<sea_orm::DatabaseConnection>,
    pub services: AppServices,
    #[allow(dead_code)]
    pub config: AppConfig,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestCtx {
    pub async fn new() -> Self {
        let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
        opt.max_connections(1).min_connections(1).sqlx_logging(false);

        let db = Database::connect(opt).await.expect("sqlite in-memory db");
        Migrator::up(&db, None).await.expect("migrations apply");
        let db = Arc::new(db);

        let config = AppConfig {
            environment: "test".into(),
            ..AppConfig::default()
        };

        let (tx, mut rx) = mpsc::channel(1024);
        let event_sender = Arc::new(EventSender::new(tx));
        // Drain events so senders never block on a full channel.
        let event_task = tokio::spawn(async move { while rx.recv().await.is_some() {} });

        let services = AppServices::new(db.clone(), event_sender, &config);

        Self {
            db,
            services,
            config,
            _event_task: event_task,
        }
    }

    /// A slot one day out, owned by `teacher`.
    pub async fn seed_slot(
        &self,
        teacher: Uuid,
        price: Decimal,
        reduction: Option<i32>,
    ) -> tutorhub_api::entities::slot::Model {
        self.seed_slot_at(teacher, price, reduction, Utc::now() + Duration::days(1))
            .await
    }

    pub async fn seed_slot_at(
        &self,
        teacher: Uuid,
        price: Decimal,
        reduction: Option<i32>,
        start_at: chrono::DateTime<Utc>,
    ) -> tutorhub_api::entities::slot::Model {
        self.services
            .slots
            .create_slot(
                teacher,
                CreateSlotInput {
                    start_at,
                    end_at: start_at + Duration::hours(1),
                    price,
                    reduction,
                    kind: SlotKind::Remote,
                },
            )
            .await
            .expect("seed slot")
    }
}
