pub mod entities;
pub mod execution;
pub mod job;
pub mod ports;
pub mod repositories;
pub mod scoring;

pub use autograder_errors::{GradingError, GradingResult};
pub use entities::*;
pub use execution::*;
pub use job::*;
pub use ports::*;
pub use repositories::*;
pub use scoring::*;
