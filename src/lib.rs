pub mod aggregate;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod logging;
pub mod sort;
pub mod storage;
pub mod store;
pub mod timer;

pub use coordinator::{TimerCoordinator, Transition};
pub use domain::{Project, Task, TimeInterval};
pub use error::{IntegrityIssue, TimerError, TimerResult};
pub use store::{Ledger, TaskQuery, TaskStore};
