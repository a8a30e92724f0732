pub mod config;
pub mod error;
pub mod event;
pub mod limits;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{CanvasError, FailureKind, NodeFailure, Result};
pub use event::EventBus;
pub use types::*;
