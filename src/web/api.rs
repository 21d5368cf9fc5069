pub mod dashboard_api;
pub mod public_api;
pub mod webhook_api;
