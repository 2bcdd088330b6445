pub mod admin_auth;
pub mod webhook_auth;
