pub mod executor_factory;
pub mod executors;
pub mod queue;
pub mod service;
pub mod worker;

pub use executor_factory::ExecutorFactory;
pub use executors::{DirectExecutor, MockExecutor, NotebookExecutor, SandboxExecutor};
pub use queue::JobQueue;
pub use service::{AutogradingService, AutogradingServiceBuilder};
pub use worker::{AutogradingWorker, WorkerStatus};
