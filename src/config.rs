// src/config.rs

use std::{env, str::FromStr, sync::Arc, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use validator::Validate;

use crate::{
    db::{
        ActivityRepository, ActivityStore, ApplicationRepository, ApplicationStore, MembershipRepository,
        MembershipStore, MetricsRepository, MetricsStore, OrgRepository, OrgStore, OutboxRepository, OutboxStore,
        ParticipantRepository, ParticipantStore,
    },
    services::{
        activity_service::ActivityLedger,
        engagement::EngagementService,
        identity_service::IdentityService,
        ingestion_service::IngestionService,
        membership_service::MembershipTracker,
        metrics_service::MetricsAggregator,
        org_resolver::OrgResolver,
        outbox_service::OutboxRelay,
        pipeline_service::PipelineEngine,
        platform_client::{PlatformClient, TelegramClient},
        recovery::{Clock, RecoveryLimiter, SystemClock, WebhookRecovery},
        scheduler::{self, JobIntervals},
        spam::HeuristicSpamScorer,
    },
};

// =========================================================================
//  CONFIGURAÇÃO (variáveis de ambiente)
// =========================================================================

#[derive(Debug, Clone, Validate)]
pub struct Config {
    pub database_url: String,
    pub bot_token: String,
    #[validate(length(min = 16))]
    pub webhook_secret: String,
    #[validate(url)]
    pub public_base_url: Option<String>,
    // Sem token, as rotas de operador não são montadas
    #[validate(length(min = 16))]
    pub admin_api_token: Option<String>,
    pub bind_addr: String,
    #[validate(range(min = 1, max = 100))]
    pub db_max_connections: u32,
    #[validate(range(min = 100, max = 60_000))]
    pub platform_timeout_ms: u64,
    #[validate(range(min = 10))]
    pub metrics_rollup_interval_secs: u64,
    #[validate(range(min = 5))]
    pub outbox_interval_secs: u64,
    #[validate(range(min = 60))]
    pub webhook_health_interval_secs: u64,
    #[validate(range(min = 60))]
    pub engagement_interval_secs: u64,
    #[validate(range(min = 1, max = 3660))]
    pub backfill_max_days: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Monta a configuração a partir de qualquer fonte chave → valor.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| lookup(key).filter(|v| !v.trim().is_empty()).with_context(|| format!("{key} deve ser definida"));

        let config = Self {
            database_url: required("DATABASE_URL")?,
            bot_token: required("TELEGRAM_BOT_TOKEN")?,
            webhook_secret: required("TELEGRAM_WEBHOOK_SECRET")?,
            public_base_url: lookup("PUBLIC_BASE_URL").filter(|v| !v.trim().is_empty()),
            admin_api_token: lookup("ADMIN_API_TOKEN").filter(|v| !v.trim().is_empty()),
            bind_addr: lookup("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            platform_timeout_ms: parse_or(&lookup, "PLATFORM_TIMEOUT_MS", 5_000)?,
            metrics_rollup_interval_secs: parse_or(&lookup, "METRICS_ROLLUP_INTERVAL_SECS", 300)?,
            outbox_interval_secs: parse_or(&lookup, "OUTBOX_INTERVAL_SECS", 60)?,
            webhook_health_interval_secs: parse_or(&lookup, "WEBHOOK_HEALTH_INTERVAL_SECS", 600)?,
            engagement_interval_secs: parse_or(&lookup, "ENGAGEMENT_INTERVAL_SECS", 86_400)?,
            backfill_max_days: parse_or(&lookup, "METRICS_BACKFILL_MAX_DAYS", 366)?,
        };

        config.validate().context("Configuração inválida")?;
        Ok(config)
    }

    pub fn job_intervals(&self) -> JobIntervals {
        JobIntervals {
            metrics_rollup: Duration::from_secs(self.metrics_rollup_interval_secs),
            outbox: Duration::from_secs(self.outbox_interval_secs),
            webhook_health: Duration::from_secs(self.webhook_health_interval_secs),
            engagement: Duration::from_secs(self.engagement_interval_secs),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("{key} inválida: '{raw}'")),
        None => Ok(default),
    }
}

// =========================================================================
//  ESTADO COMPARTILHADO
// =========================================================================

#[derive(Clone)]
pub struct AppState {
    pub db_pool: PgPool,
    pub config: Arc<Config>,
    pub ingestion: IngestionService,
    pub orgs: OrgResolver,
    pub identity: IdentityService,
    pub pipeline: PipelineEngine,
    pub metrics: MetricsAggregator,
    pub outbox: OutboxRelay,
    pub engagement: EngagementService,
    pub recovery: Option<WebhookRecovery>,
}

/// Os stores por trás dos serviços: Postgres em produção, memória nos testes.
pub struct Stores {
    pub orgs: Arc<dyn OrgStore>,
    pub participants: Arc<dyn ParticipantStore>,
    pub memberships: Arc<dyn MembershipStore>,
    pub activity: Arc<dyn ActivityStore>,
    pub metrics: Arc<dyn MetricsStore>,
    pub applications: Arc<dyn ApplicationStore>,
    pub outbox: Arc<dyn OutboxStore>,
}

impl Stores {
    pub fn postgres(pool: &PgPool) -> Self {
        Self {
            orgs: Arc::new(OrgRepository::new(pool.clone())),
            participants: Arc::new(ParticipantRepository::new(pool.clone())),
            memberships: Arc::new(MembershipRepository::new(pool.clone())),
            activity: Arc::new(ActivityRepository::new(pool.clone())),
            metrics: Arc::new(MetricsRepository::new(pool.clone())),
            applications: Arc::new(ApplicationRepository::new(pool.clone())),
            outbox: Arc::new(OutboxRepository::new(pool.clone())),
        }
    }
}

impl AppState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let db_pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.database_url)
            .await?;

        tracing::info!("✅ Conexão com o banco de dados estabelecida com sucesso!");

        let platform: Arc<dyn PlatformClient> = Arc::new(TelegramClient::new(
            config.bot_token.clone(),
            Duration::from_millis(config.platform_timeout_ms),
        )?);

        let stores = Stores::postgres(&db_pool);
        Ok(Self::assemble(config, db_pool, stores, platform))
    }

    /// Liga stores → serviços. Único lugar onde o grafo de dependências é montado.
    pub fn assemble(config: Config, db_pool: PgPool, stores: Stores, platform: Arc<dyn PlatformClient>) -> Self {
        let orgs = OrgResolver::new(stores.orgs);
        let identity = IdentityService::new(stores.participants.clone());
        let pipeline = PipelineEngine::new(
            stores.applications,
            stores.participants.clone(),
            stores.outbox.clone(),
            platform.clone(),
            Arc::new(HeuristicSpamScorer),
        );
        let ingestion = IngestionService::new(
            orgs.clone(),
            identity.clone(),
            MembershipTracker::new(stores.memberships),
            ActivityLedger::new(stores.activity),
            pipeline.clone(),
            stores.participants.clone(),
        );
        let metrics = MetricsAggregator::new(stores.metrics.clone());
        let outbox = OutboxRelay::new(stores.outbox, platform.clone());
        let engagement = EngagementService::new(stores.participants, stores.metrics);

        let recovery = config.public_base_url.as_deref().map(|base_url| {
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            let limiter = Arc::new(RecoveryLimiter::new(clock.clone()));
            WebhookRecovery::new(platform.clone(), limiter, clock, base_url, config.webhook_secret.clone())
        });

        Self {
            db_pool,
            config: Arc::new(config),
            ingestion,
            orgs,
            identity,
            pipeline,
            metrics,
            outbox,
            engagement,
            recovery,
        }
    }

    pub fn spawn_jobs(&self) -> Vec<tokio::task::JoinHandle<()>> {
        scheduler::spawn_jobs(
            self.config.job_intervals(),
            self.orgs.clone(),
            self.metrics.clone(),
            self.outbox.clone(),
            self.engagement.clone(),
            self.recovery.clone(),
        )
    }
}
