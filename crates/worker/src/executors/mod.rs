//! 笔记本执行器
//!
//! 所有执行器实现同一个 [`NotebookExecutor`] 契约。单元格级别的失败以
//! [`CellResult::Failure`] 数据返回；整本笔记本的致命失败以
//! [`NotebookRun::Aborted`] 返回；只有宿主机层面的问题才会返回 `Err`。

use std::collections::HashSet;

use async_trait::async_trait;
use autograder_domain::{CellResult, ExecutionCell, ExecutionNotebook, GradingResult, NotebookRun};

pub mod direct;
pub mod mock;
pub mod protocol;
pub mod sandbox;

pub use direct::DirectExecutor;
pub use mock::MockExecutor;
pub use sandbox::SandboxExecutor;

#[async_trait]
pub trait NotebookExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// 在全新的执行环境中执行单个单元格
    async fn execute_cell(&self, cell: &ExecutionCell) -> GradingResult<CellResult>;

    /// 按顺序执行笔记本中的代码单元格，单元格之间共享同一个执行环境
    ///
    /// `scope` 为 `None` 时执行全部代码单元格。
    async fn execute_notebook(
        &self,
        notebook: &ExecutionNotebook,
        scope: Option<&HashSet<String>>,
    ) -> GradingResult<NotebookRun>;
}
