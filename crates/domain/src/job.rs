//! 评分任务
//!
//! 一个 [`Job`] 跟踪一次评分请求从提交、执行到持久化的全过程。
//! 任务在同一时刻只被一个Worker独占修改，状态只能向前推进：
//! `Created -> Running -> {Completed, Failed}`。

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Assignment, Grade, Submission};
use crate::{GradingError, GradingResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobState {
    #[serde(rename = "CREATED")]
    Created,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Created => "CREATED",
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// 因执行器整体失败而未能评分的笔记本
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UngradedNotebook {
    pub notebook_submission_id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub submission_id: String,
    pub assignment: Assignment,
    pub submission: Submission,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// notebook_submission_id -> cell_id -> Grade
    pub grades: HashMap<String, HashMap<String, Grade>>,
    pub ungraded_notebooks: Vec<UngradedNotebook>,
    state: JobState,
}

impl Job {
    pub fn new(assignment: Assignment, submission: Submission) -> Self {
        let submission_id = submission.id.clone();
        Self {
            id: format!("job-{}-{}", submission_id, Uuid::new_v4().simple()),
            submission_id,
            assignment,
            submission,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            grades: HashMap::new(),
            ungraded_notebooks: Vec::new(),
            state: JobState::Created,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state == JobState::Completed
    }

    pub fn mark_started(&mut self) -> GradingResult<()> {
        self.transition(JobState::Created, JobState::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_completed(&mut self) -> GradingResult<()> {
        self.transition(JobState::Running, JobState::Completed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) -> GradingResult<()> {
        self.transition(JobState::Running, JobState::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// 执行已完成但结果未能持久化，任务回到未完成状态并记录错误
    pub fn mark_persistence_failed(&mut self, error: impl Into<String>) -> GradingResult<()> {
        self.transition(JobState::Completed, JobState::Failed)?;
        self.completed_at = None;
        self.error = Some(error.into());
        Ok(())
    }

    fn transition(&mut self, expected: JobState, next: JobState) -> GradingResult<()> {
        if self.state != expected {
            return Err(GradingError::invalid_transition(&self.id, self.state, next));
        }
        self.state = next;
        Ok(())
    }

    /// 首次出现某个单元格的结果时惰性创建成绩累加器
    pub fn get_or_create_grade(&mut self, notebook_submission_id: &str, cell_id: &str) -> &mut Grade {
        self.grades
            .entry(notebook_submission_id.to_string())
            .or_default()
            .entry(cell_id.to_string())
            .or_insert_with(|| Grade::new(notebook_submission_id, cell_id))
    }

    pub fn record_ungraded(&mut self, notebook_submission_id: &str, reason: impl Into<String>) {
        self.ungraded_notebooks.push(UngradedNotebook {
            notebook_submission_id: notebook_submission_id.to_string(),
            reason: reason.into(),
        });
    }

    pub fn all_grades(&self) -> Vec<Grade> {
        self.grades
            .values()
            .flat_map(|cells| cells.values().cloned())
            .collect()
    }

    pub fn grade_count(&self) -> usize {
        self.grades.values().map(HashMap::len).sum()
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Job({}, submission={}, state={})", self.id, self.submission_id, self.state)
    }
}
