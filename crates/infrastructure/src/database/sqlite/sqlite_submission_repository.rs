use async_trait::async_trait;
use autograder_domain::{
    CellSubmission, GradingResult, NotebookSubmission, Submission, SubmissionRepository,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

pub struct SqliteSubmissionRepository {
    pool: SqlitePool,
}

impl SqliteSubmissionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_notebook_submissions(
        &self,
        submission_id: &str,
    ) -> GradingResult<Vec<NotebookSubmission>> {
        let rows = sqlx::query(
            "SELECT id, notebook_id FROM notebook_submissions WHERE submission_id = ? ORDER BY id",
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await?;

        let mut notebook_submissions = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let cell_submissions = sqlx::query(
                "SELECT cell_id, submitted_source FROM cell_submissions WHERE notebook_submission_id = ? ORDER BY cell_id",
            )
            .bind(&id)
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| -> GradingResult<CellSubmission> {
                Ok(CellSubmission {
                    cell_id: row.try_get("cell_id")?,
                    submitted_source: row.try_get("submitted_source")?,
                })
            })
            .collect::<GradingResult<Vec<_>>>()?;

            notebook_submissions.push(NotebookSubmission {
                id,
                notebook_id: row.try_get("notebook_id")?,
                cell_submissions,
            });
        }
        Ok(notebook_submissions)
    }
}

#[async_trait]
impl SubmissionRepository for SqliteSubmissionRepository {
    #[instrument(skip(self, submission), fields(submission_id = %submission.id))]
    async fn register(&self, submission: &Submission) -> GradingResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO submissions (id, assignment_id, user_id, lms_user_id, status)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&submission.id)
        .bind(&submission.assignment_id)
        .bind(&submission.user_id)
        .bind(&submission.lms_user_id)
        .bind(submission.status)
        .execute(&mut *tx)
        .await?;

        for notebook_submission in &submission.notebook_submissions {
            sqlx::query(
                r#"
                INSERT INTO notebook_submissions (id, submission_id, notebook_id)
                VALUES (?, ?, ?)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(&notebook_submission.id)
            .bind(&submission.id)
            .bind(&notebook_submission.notebook_id)
            .execute(&mut *tx)
            .await?;

            for cell_submission in &notebook_submission.cell_submissions {
                sqlx::query(
                    r#"
                    INSERT INTO cell_submissions (notebook_submission_id, cell_id, submitted_source)
                    VALUES (?, ?, ?)
                    ON CONFLICT (notebook_submission_id, cell_id) DO NOTHING
                    "#,
                )
                .bind(&notebook_submission.id)
                .bind(&cell_submission.cell_id)
                .bind(&cell_submission.submitted_source)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        debug!("提交 {} 已登记", submission.id);
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> GradingResult<Option<Submission>> {
        let row = sqlx::query(
            "SELECT id, assignment_id, user_id, lms_user_id, status FROM submissions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(Submission {
            id: row.try_get("id")?,
            assignment_id: row.try_get("assignment_id")?,
            user_id: row.try_get("user_id")?,
            lms_user_id: row.try_get("lms_user_id")?,
            status: row.try_get("status")?,
            notebook_submissions: self.load_notebook_submissions(id).await?,
        }))
    }
}
