pub mod activity_service;
pub mod engagement;
pub mod identity_service;
pub mod ingestion_service;
pub mod membership_service;
pub mod metrics_service;
pub mod normalizer;
pub mod org_resolver;
pub mod outbox_service;
pub mod pipeline_service;
pub mod platform_client;
pub mod recovery;
pub mod scheduler;
pub mod spam;
