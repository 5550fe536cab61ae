pub mod backend;
pub mod coordinator;
pub mod metrics;
pub mod prompt;

pub use coordinator::{BackendHandle, CoordinatorError, LoadPhase, LoadStatus, ModelCoordinator};
pub use metrics::{get_metrics, init_metrics};
