pub mod batches;
pub mod health;
pub mod pipeline;
pub mod webhooks;
