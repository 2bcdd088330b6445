pub mod store;
pub use store::{ActivityStore, ApplicationStore, MembershipStore, MetricsStore, OrgStore, OutboxStore, ParticipantStore};

pub mod org_repo;
pub use org_repo::OrgRepository;
pub mod participant_repo;
pub use participant_repo::ParticipantRepository;
pub mod membership_repo;
pub use membership_repo::MembershipRepository;
pub mod activity_repo;
pub use activity_repo::ActivityRepository;
pub mod metrics_repo;
pub use metrics_repo::MetricsRepository;
pub mod application_repo;
pub use application_repo::ApplicationRepository;
pub mod outbox_repo;
pub use outbox_repo::OutboxRepository;

#[cfg(test)]
pub mod memory;
