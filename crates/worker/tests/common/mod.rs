#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use autograder_domain::{
    Assignment, Cell, CellError, CellResult, CellSubmission, CellType, ExecutionCell,
    ExecutionNotebook, Grade, GradeRepository, GradingError, GradingResult, Notebook,
    NotebookRun, NotebookSubmission, ScoreReporter, Submission, SubmissionStatus,
};
use autograder_worker::NotebookExecutor;
use tokio::sync::Mutex;

pub fn cell(id: &str, idx: i32, cell_type: CellType, max_score: f64, is_grade: bool) -> Cell {
    Cell {
        id: id.to_string(),
        idx,
        cell_type,
        source: Some(format!("# {id}")),
        source_student: Some(format!("# stub {id}")),
        meta: None,
        max_score,
        is_grade,
        is_solution: is_grade,
    }
}

/// 一个笔记本：说明、准备代码、两个各5分的评分单元格
pub fn assignment() -> Assignment {
    Assignment {
        id: "a-1".to_string(),
        name: "Lab 1".to_string(),
        lti_id: Some("lti-assignment".to_string()),
        course_lti_id: Some("lti-course".to_string()),
        score_maximum: Some(100.0),
        notebooks: vec![Notebook {
            id: "nb-1".to_string(),
            name: "lab1.ipynb".to_string(),
            idx: 0,
            kernelspec: None,
            cells: vec![
                cell("intro", 0, CellType::Markdown, 0.0, false),
                cell("setup", 1, CellType::Code, 0.0, false),
                cell("q1", 2, CellType::Code, 5.0, true),
                cell("q2", 3, CellType::Code, 5.0, true),
            ],
        }],
    }
}

pub fn submission(id: &str) -> Submission {
    Submission {
        id: id.to_string(),
        assignment_id: "a-1".to_string(),
        user_id: "u-1".to_string(),
        lms_user_id: Some("lms-user".to_string()),
        status: SubmissionStatus::Submitted,
        notebook_submissions: vec![NotebookSubmission {
            id: format!("{id}-nb-1"),
            notebook_id: "nb-1".to_string(),
            cell_submissions: vec![CellSubmission {
                cell_id: "q1".to_string(),
                submitted_source: "answer = 42".to_string(),
            }],
        }],
    }
}

/// 按配置让部分单元格失败、整本笔记本中止或直接报错的执行器
#[derive(Default)]
pub struct ScriptedExecutor {
    pub failing: HashSet<String>,
    pub abort: bool,
    pub error: bool,
    pub delay_ms: u64,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<ExecutionNotebook>>,
}

impl ScriptedExecutor {
    pub fn failing(cells: &[&str]) -> Self {
        Self {
            failing: cells.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl NotebookExecutor for ScriptedExecutor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute_cell(&self, cell: &ExecutionCell) -> GradingResult<CellResult> {
        Ok(CellResult::success(cell.source.clone()))
    }

    async fn execute_notebook(
        &self,
        notebook: &ExecutionNotebook,
        scope: Option<&HashSet<String>>,
    ) -> GradingResult<NotebookRun> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().await.push(notebook.clone());
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        if self.error {
            return Err(GradingError::execution_error("executor exploded"));
        }
        if self.abort {
            return Ok(NotebookRun::aborted("memory limit exceeded"));
        }

        let results = notebook
            .code_cells(scope)
            .map(|cell| {
                let result = if self.failing.contains(&cell.id) {
                    CellResult::failure(
                        "",
                        CellError::with_traceback(
                            "AssertionError",
                            "Traceback (most recent call last):\nAssertionError",
                        ),
                    )
                } else {
                    CellResult::success("ok")
                };
                (cell.id.clone(), result)
            })
            .collect();
        Ok(NotebookRun::Completed(results))
    }
}

/// 内存成绩仓储，按 (笔记本提交ID, 单元格ID) 覆盖写入
#[derive(Default)]
pub struct InMemoryGradeRepository {
    pub statuses: Mutex<HashMap<String, SubmissionStatus>>,
    pub grades: Mutex<HashMap<String, HashMap<(String, String), Grade>>>,
    pub fail_saves: AtomicBool,
    pub saves: AtomicUsize,
}

impl InMemoryGradeRepository {
    pub async fn register(&self, submission_id: &str) {
        self.statuses
            .lock()
            .await
            .insert(submission_id.to_string(), SubmissionStatus::Submitted);
    }

    pub async fn status(&self, submission_id: &str) -> Option<SubmissionStatus> {
        self.statuses.lock().await.get(submission_id).copied()
    }
}

#[async_trait]
impl GradeRepository for InMemoryGradeRepository {
    async fn save_results(&self, submission_id: &str, grades: &[Grade]) -> GradingResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(GradingError::database_error("disk full"));
        }

        let mut statuses = self.statuses.lock().await;
        let status = statuses
            .get_mut(submission_id)
            .ok_or_else(|| GradingError::submission_not_found(submission_id))?;
        *status = SubmissionStatus::Graded;

        let mut stored = self.grades.lock().await;
        let entry = stored.entry(submission_id.to_string()).or_default();
        for grade in grades {
            let key = (grade.notebook_submission_id.clone(), grade.cell_id.clone());
            entry
                .entry(key)
                .and_modify(|existing| {
                    existing.auto_score = grade.auto_score;
                    existing.execution_error = grade.execution_error.clone();
                    existing.needs_manual_grading = grade.needs_manual_grading;
                    existing.graded_at = grade.graded_at;
                })
                .or_insert_with(|| grade.clone());
        }
        Ok(())
    }

    async fn find_grades_by_submission(&self, submission_id: &str) -> GradingResult<Vec<Grade>> {
        Ok(self
            .grades
            .lock()
            .await
            .get(submission_id)
            .map(|grades| grades.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportedScore {
    pub course_id: String,
    pub assignment_id: String,
    pub user_id: String,
    pub score: f64,
    pub score_max: Option<f64>,
}

/// 记录每次上报的成绩上报客户端
#[derive(Default)]
pub struct RecordingReporter {
    pub reports: Mutex<Vec<ReportedScore>>,
    pub fail: bool,
}

#[async_trait]
impl ScoreReporter for RecordingReporter {
    async fn submit_score(
        &self,
        course_external_id: &str,
        assignment_external_id: &str,
        user_external_id: &str,
        score: f64,
        score_max: Option<f64>,
    ) -> GradingResult<()> {
        self.reports.lock().await.push(ReportedScore {
            course_id: course_external_id.to_string(),
            assignment_id: assignment_external_id.to_string(),
            user_id: user_external_id.to_string(),
            score,
            score_max,
        });
        if self.fail {
            return Err(GradingError::reporting_error("LTI endpoint returned 500"));
        }
        Ok(())
    }
}
