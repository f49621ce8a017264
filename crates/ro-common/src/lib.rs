pub mod api;
pub mod db;
pub mod dispatch;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod reconcile;
pub mod run_id;
pub mod store;
pub mod voice;
pub mod webhook;

pub use models::*;
