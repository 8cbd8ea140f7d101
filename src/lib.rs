pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod prometheus;
pub mod render;

pub use error::{RenderError, Result};
