pub mod graph;

pub use graph::{router, serve, AppState};
