use async_trait::async_trait;
use autograder_domain::{Grade, GradeRepository, GradingError, GradingResult, SubmissionStatus};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

pub struct SqliteGradeRepository {
    pool: SqlitePool,
}

impl SqliteGradeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_grade(row: &sqlx::sqlite::SqliteRow) -> GradingResult<Grade> {
        Ok(Grade {
            id: row.try_get("id")?,
            notebook_submission_id: row.try_get("notebook_submission_id")?,
            cell_id: row.try_get("cell_id")?,
            auto_score: row.try_get("auto_score")?,
            manual_score: row.try_get("manual_score")?,
            extra_credit: row.try_get("extra_credit")?,
            needs_manual_grading: row.try_get("needs_manual_grading")?,
            execution_error: row.try_get("execution_error")?,
            graded_at: row.try_get("graded_at")?,
            graded_by: row.try_get("graded_by")?,
        })
    }
}

#[async_trait]
impl GradeRepository for SqliteGradeRepository {
    /// 重评分时按 (notebook_submission_id, cell_id) 覆盖自动评分字段，
    /// 保留人工评分、额外加分与评分人
    #[instrument(skip(self, grades), fields(submission_id = %submission_id, grade_count = grades.len()))]
    async fn save_results(&self, submission_id: &str, grades: &[Grade]) -> GradingResult<()> {
        let mut tx = self.pool.begin().await?;

        for grade in grades {
            sqlx::query(
                r#"
                INSERT INTO grades (id, notebook_submission_id, cell_id, auto_score, manual_score,
                                    extra_credit, needs_manual_grading, execution_error, graded_at, graded_by)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (notebook_submission_id, cell_id) DO UPDATE SET
                    auto_score = excluded.auto_score,
                    needs_manual_grading = excluded.needs_manual_grading,
                    execution_error = excluded.execution_error,
                    graded_at = excluded.graded_at
                "#,
            )
            .bind(&grade.id)
            .bind(&grade.notebook_submission_id)
            .bind(&grade.cell_id)
            .bind(grade.auto_score)
            .bind(grade.manual_score)
            .bind(grade.extra_credit)
            .bind(grade.needs_manual_grading)
            .bind(&grade.execution_error)
            .bind(grade.graded_at)
            .bind(&grade.graded_by)
            .execute(&mut *tx)
            .await?;
        }

        let updated = sqlx::query(
            "UPDATE submissions SET status = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(SubmissionStatus::Graded)
        .bind(submission_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(GradingError::submission_not_found(submission_id));
        }

        tx.commit().await?;
        debug!("提交 {} 的 {} 条成绩已写入", submission_id, grades.len());
        Ok(())
    }

    async fn find_grades_by_submission(&self, submission_id: &str) -> GradingResult<Vec<Grade>> {
        let rows = sqlx::query(
            r#"
            SELECT g.id, g.notebook_submission_id, g.cell_id, g.auto_score, g.manual_score,
                   g.extra_credit, g.needs_manual_grading, g.execution_error, g.graded_at, g.graded_by
            FROM grades g
            JOIN notebook_submissions ns ON ns.id = g.notebook_submission_id
            WHERE ns.submission_id = ?
            ORDER BY g.notebook_submission_id, g.cell_id
            "#,
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_grade).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::sqlite::{DatabaseManager, SqliteSubmissionRepository};
    use autograder_domain::{NotebookSubmission, Submission, SubmissionRepository};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> (SqlitePool, SqliteGradeRepository) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        DatabaseManager::from_pool(pool.clone()).migrate().await.unwrap();

        let submission = Submission {
            id: "s-1".to_string(),
            assignment_id: "a-1".to_string(),
            user_id: "u-1".to_string(),
            lms_user_id: None,
            status: SubmissionStatus::Submitted,
            notebook_submissions: vec![NotebookSubmission {
                id: "ns-1".to_string(),
                notebook_id: "nb-1".to_string(),
                cell_submissions: Vec::new(),
            }],
        };
        SqliteSubmissionRepository::new(pool.clone())
            .register(&submission)
            .await
            .unwrap();

        (pool.clone(), SqliteGradeRepository::new(pool))
    }

    async fn status(pool: &SqlitePool, id: &str) -> SubmissionStatus {
        sqlx::query("SELECT status FROM submissions WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
            .get("status")
    }

    #[tokio::test]
    async fn test_save_results_marks_submission_graded() {
        let (pool, repo) = setup().await;

        let mut ok = Grade::new("ns-1", "q1");
        ok.record_success(5.0);
        let mut failed = Grade::new("ns-1", "q2");
        failed.record_failure("AssertionError");

        repo.save_results("s-1", &[ok, failed]).await.unwrap();

        assert_eq!(status(&pool, "s-1").await, SubmissionStatus::Graded);
        let grades = repo.find_grades_by_submission("s-1").await.unwrap();
        assert_eq!(grades.len(), 2);
        assert_eq!(grades[0].cell_id, "q1");
        assert_eq!(grades[0].auto_score, Some(5.0));
        assert!(!grades[0].needs_manual_grading);
        assert!(grades[0].graded_at.is_some());
        assert_eq!(grades[1].execution_error.as_deref(), Some("AssertionError"));
    }

    #[tokio::test]
    async fn test_regrade_preserves_manual_fields() {
        let (pool, repo) = setup().await;

        let mut first = Grade::new("ns-1", "q1");
        first.record_failure("NameError");
        repo.save_results("s-1", &[first]).await.unwrap();

        sqlx::query(
            "UPDATE grades SET manual_score = 4.0, extra_credit = 1.0, graded_by = 'ta' WHERE cell_id = 'q1'",
        )
        .execute(&pool)
        .await
        .unwrap();

        let mut second = Grade::new("ns-1", "q1");
        second.record_success(5.0);
        repo.save_results("s-1", &[second]).await.unwrap();

        let grades = repo.find_grades_by_submission("s-1").await.unwrap();
        assert_eq!(grades.len(), 1);
        let grade = &grades[0];
        assert_eq!(grade.auto_score, Some(5.0));
        assert!(grade.execution_error.is_none());
        assert_eq!(grade.manual_score, Some(4.0));
        assert_eq!(grade.extra_credit, 1.0);
        assert_eq!(grade.graded_by.as_deref(), Some("ta"));
        assert_eq!(grade.final_score(), 5.0);
    }

    #[tokio::test]
    async fn test_missing_submission_rolls_back() {
        let (_pool, repo) = setup().await;

        let mut grade = Grade::new("ns-1", "q1");
        grade.record_success(5.0);
        let err = repo.save_results("missing", &[grade]).await.unwrap_err();
        assert!(matches!(err, GradingError::SubmissionNotFound { .. }));

        // 事务回滚，成绩没有写入
        assert!(repo.find_grades_by_submission("s-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_grades_for_unknown_notebook_submission_fail() {
        let (pool, repo) = setup().await;

        let grade = Grade::new("ns-unknown", "q1");
        let err = repo.save_results("s-1", &[grade]).await.unwrap_err();
        assert!(matches!(err, GradingError::Database(_)));
        assert_eq!(status(&pool, "s-1").await, SubmissionStatus::Submitted);
    }
}
