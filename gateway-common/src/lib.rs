pub mod codec;
pub mod config;
pub mod error;
pub mod metrics;
pub mod mode;
pub mod publisher;
pub mod record;
pub mod transport;
