//! Application configuration

mod schema;
mod store;

pub use schema::{AppConfig, SessionLimits, VideoConfig, WebConfig, MAX_SESSIONS_LIMIT};
pub use store::{load_config, save_config};
