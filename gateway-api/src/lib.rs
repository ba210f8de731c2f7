pub mod api;
pub mod config;
pub mod handlers;
pub mod time;
