pub mod activity;
pub mod application;
pub mod event;
pub mod membership;
pub mod metrics;
pub mod org;
pub mod outbox;
pub mod participant;
pub mod telegram;
