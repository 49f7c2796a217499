use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use autograder_domain::{CellResult, ExecutionCell, ExecutionNotebook, GradingResult, NotebookRun};
use tracing::{debug, info};

use super::NotebookExecutor;

/// 模拟执行器，所有单元格都以固定输出成功
pub struct MockExecutor {
    output: String,
}

impl MockExecutor {
    pub fn new(output: impl Into<String>) -> Self {
        let output = output.into();
        info!("MockExecutor已初始化: output={}", output);
        Self { output }
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new("Mock output")
    }
}

#[async_trait]
impl NotebookExecutor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn execute_cell(&self, cell: &ExecutionCell) -> GradingResult<CellResult> {
        debug!("模拟执行单元格: {}", cell.id);
        Ok(CellResult::success(self.output.clone()))
    }

    async fn execute_notebook(
        &self,
        notebook: &ExecutionNotebook,
        scope: Option<&HashSet<String>>,
    ) -> GradingResult<NotebookRun> {
        info!(
            "模拟执行笔记本: name={}, cells={}",
            notebook.name,
            notebook.cells.len()
        );

        let results: HashMap<String, CellResult> = notebook
            .code_cells(scope)
            .map(|cell| (cell.id.clone(), CellResult::success(self.output.clone())))
            .collect();

        Ok(NotebookRun::Completed(results))
    }
}
