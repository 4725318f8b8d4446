pub mod analyses;
pub mod auth;
pub mod debug;
pub mod payments;
pub mod profile;
pub mod signature;
pub mod subscriptions;
pub mod webhooks;
