//! 执行模型
//!
//! 执行器的输入（由持久化的单元格重建的 [`ExecutionNotebook`]）与输出
//! （每个单元格的 [`CellResult`]，以及整本笔记本级别的 [`NotebookRun`]）。

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::entities::{CellType, Notebook, NotebookSubmission};

/// 单元格执行失败信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellError {
    pub message: String,
    /// 完整的回溯文本
    pub traceback: Option<String>,
}

impl CellError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            traceback: None,
        }
    }

    pub fn with_traceback(message: impl Into<String>, traceback: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            traceback: Some(traceback.into()),
        }
    }

    /// 写入成绩记录的错误文本，优先使用回溯
    pub fn detail(&self) -> &str {
        self.traceback.as_deref().unwrap_or(&self.message)
    }
}

impl std::fmt::Display for CellError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// 单个单元格的执行结果
///
/// 单元格级别的失败以数据形式返回，不会跨越执行器边界抛出。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellResult {
    Success { output: String },
    Failure { output: String, error: CellError },
}

impl CellResult {
    pub fn success(output: impl Into<String>) -> Self {
        CellResult::Success {
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>, error: CellError) -> Self {
        CellResult::Failure {
            output: output.into(),
            error,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CellResult::Success { .. })
    }

    pub fn output(&self) -> &str {
        match self {
            CellResult::Success { output } | CellResult::Failure { output, .. } => output,
        }
    }

    pub fn error(&self) -> Option<&CellError> {
        match self {
            CellResult::Success { .. } => None,
            CellResult::Failure { error, .. } => Some(error),
        }
    }
}

/// 整本笔记本的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotebookRun {
    /// 正常结束，按单元格ID给出结果
    Completed(HashMap<String, CellResult>),
    /// 虚拟机/解释器整体失败，没有任何单元格结果
    Aborted { reason: String },
}

impl NotebookRun {
    pub fn aborted(reason: impl Into<String>) -> Self {
        NotebookRun::Aborted {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionCell {
    pub id: String,
    pub cell_type: CellType,
    pub source: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ExecutionCell {
    pub fn is_code(&self) -> bool {
        self.cell_type == CellType::Code
    }
}

/// 用于执行的笔记本
///
/// 非答案单元格使用标准源码；答案单元格使用学生提交的源码，
/// 学生未提交时回退到面向学生的占位源码。单元格按存储顺序排列。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExecutionNotebook {
    pub name: String,
    #[serde(default)]
    pub kernelspec: Option<serde_json::Value>,
    pub cells: Vec<ExecutionCell>,
}

impl ExecutionNotebook {
    pub fn reconstruct(notebook: &Notebook, submission: &NotebookSubmission) -> Self {
        let submitted: HashMap<&str, &str> = submission
            .cell_submissions
            .iter()
            .map(|cs| (cs.cell_id.as_str(), cs.submitted_source.as_str()))
            .collect();

        let mut sorted: Vec<_> = notebook.cells.iter().collect();
        sorted.sort_by_key(|c| c.idx);

        let cells = sorted
            .into_iter()
            .map(|cell| {
                let source = if cell.is_solution {
                    submitted
                        .get(cell.id.as_str())
                        .map(|s| s.to_string())
                        .or_else(|| cell.source_student.clone())
                } else {
                    cell.source.clone()
                };

                ExecutionCell {
                    id: cell.id.clone(),
                    cell_type: cell.cell_type,
                    source: source.unwrap_or_default(),
                    metadata: cell.meta.clone().unwrap_or(serde_json::Value::Null),
                }
            })
            .collect();

        Self {
            name: notebook.name.clone(),
            kernelspec: notebook.kernelspec.clone(),
            cells,
        }
    }

    pub fn cell_ids(&self) -> HashSet<String> {
        self.cells.iter().map(|c| c.id.clone()).collect()
    }

    /// 选出需要执行的代码单元格，`scope` 为空表示全部
    pub fn code_cells<'a>(
        &'a self,
        scope: Option<&'a HashSet<String>>,
    ) -> impl Iterator<Item = &'a ExecutionCell> + 'a {
        self.cells
            .iter()
            .filter(|c| c.is_code())
            .filter(move |c| scope.map_or(true, |ids| ids.contains(&c.id)))
    }
}
