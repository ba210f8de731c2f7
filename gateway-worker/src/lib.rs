pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod router;
pub mod sink;
pub mod worker;
