mod app;
mod records;
mod stream;

pub use app::{add_routes, AppState};
