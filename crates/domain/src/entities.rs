//! 评分领域实体
//!
//! 作业读模型（Assignment / Notebook / Cell）、学生提交（Submission）以及
//! 单元格成绩（Grade）。读模型由外部持久化层提供，这里只定义结构。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
}

/// 作业中的单元格定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    /// Jupyter原生单元格ID，跨重评分保持稳定
    pub id: String,
    /// 在笔记本中的顺序
    pub idx: i32,
    pub cell_type: CellType,
    /// 标准源码（教师版本）
    #[serde(default)]
    pub source: Option<String>,
    /// 面向学生的源码（答案单元格的占位版本）
    #[serde(default)]
    pub source_student: Option<String>,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
    #[serde(default)]
    pub max_score: f64,
    #[serde(default)]
    pub is_grade: bool,
    #[serde(default)]
    pub is_solution: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    pub id: String,
    pub name: String,
    pub idx: i32,
    #[serde(default)]
    pub kernelspec: Option<serde_json::Value>,
    #[serde(default)]
    pub cells: Vec<Cell>,
}

impl Notebook {
    pub fn find_cell(&self, cell_id: &str) -> Option<&Cell> {
        self.cells.iter().find(|c| c.id == cell_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub name: String,
    /// 外部评分平台中的作业ID
    #[serde(default)]
    pub lti_id: Option<String>,
    /// 外部评分平台中的课程ID
    #[serde(default)]
    pub course_lti_id: Option<String>,
    /// 外部评分平台配置的满分
    #[serde(default)]
    pub score_maximum: Option<f64>,
    #[serde(default)]
    pub notebooks: Vec<Notebook>,
}

impl Assignment {
    /// 可评分单元格的满分之和
    pub fn max_possible_score(&self) -> f64 {
        self.notebooks
            .iter()
            .flat_map(|nb| nb.cells.iter())
            .filter(|c| c.is_grade)
            .map(|c| c.max_score)
            .sum()
    }

    pub fn external_link(&self) -> Option<ExternalLink<'_>> {
        match (&self.course_lti_id, &self.lti_id) {
            (Some(course_id), Some(assignment_id)) => Some(ExternalLink {
                course_id,
                assignment_id,
            }),
            _ => None,
        }
    }
}

/// 作业与外部评分平台的关联
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalLink<'a> {
    pub course_id: &'a str,
    pub assignment_id: &'a str,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum SubmissionStatus {
    #[default]
    #[serde(rename = "SUBMITTED")]
    Submitted,
    #[serde(rename = "GRADED")]
    Graded,
    #[serde(rename = "ARCHIVED")]
    Archived,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Submitted => "SUBMITTED",
            SubmissionStatus::Graded => "GRADED",
            SubmissionStatus::Archived => "ARCHIVED",
        }
    }
}

impl std::str::FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUBMITTED" => Ok(SubmissionStatus::Submitted),
            "GRADED" => Ok(SubmissionStatus::Graded),
            "ARCHIVED" => Ok(SubmissionStatus::Archived),
            _ => Err(format!("Invalid submission status: {s}")),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for SubmissionStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for SubmissionStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<SubmissionStatus>().map_err(Into::into)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for SubmissionStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellSubmission {
    pub cell_id: String,
    pub submitted_source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookSubmission {
    pub id: String,
    pub notebook_id: String,
    #[serde(default)]
    pub cell_submissions: Vec<CellSubmission>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub assignment_id: String,
    pub user_id: String,
    /// 外部评分平台中的用户ID
    #[serde(default)]
    pub lms_user_id: Option<String>,
    #[serde(default)]
    pub status: SubmissionStatus,
    #[serde(default)]
    pub notebook_submissions: Vec<NotebookSubmission>,
}

impl Submission {
    pub fn notebook_submission_for(&self, notebook_id: &str) -> Option<&NotebookSubmission> {
        self.notebook_submissions
            .iter()
            .find(|ns| ns.notebook_id == notebook_id)
    }
}

/// 单元格成绩
///
/// 自动评分过程中作为累加器在内存中构建，随后整体持久化。
/// `manual_score` / `extra_credit` / `graded_by` 由人工评分维护，自动评分不会覆盖。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Grade {
    pub id: String,
    pub notebook_submission_id: String,
    pub cell_id: String,
    pub auto_score: Option<f64>,
    pub manual_score: Option<f64>,
    pub extra_credit: f64,
    pub needs_manual_grading: bool,
    pub execution_error: Option<String>,
    pub graded_at: Option<DateTime<Utc>>,
    pub graded_by: Option<String>,
}

impl Grade {
    pub fn new(notebook_submission_id: impl Into<String>, cell_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            notebook_submission_id: notebook_submission_id.into(),
            cell_id: cell_id.into(),
            auto_score: Some(0.0),
            manual_score: None,
            extra_credit: 0.0,
            needs_manual_grading: true,
            execution_error: None,
            graded_at: None,
            graded_by: None,
        }
    }

    pub fn record_success(&mut self, max_score: f64) {
        self.auto_score = Some(max_score);
        self.execution_error = None;
        self.needs_manual_grading = false;
        self.graded_at = Some(Utc::now());
    }

    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.auto_score = Some(0.0);
        self.execution_error = Some(error.into());
        self.needs_manual_grading = false;
        self.graded_at = Some(Utc::now());
    }

    /// 人工分优先，其次自动分，再加上额外加分
    pub fn final_score(&self) -> f64 {
        let base = self.manual_score.or(self.auto_score).unwrap_or(0.0);
        base + self.extra_credit
    }
}
