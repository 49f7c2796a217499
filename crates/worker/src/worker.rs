use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use autograder_domain::{
    ExecutionNotebook, GradingResult, Job, Notebook, NotebookRun, NotebookSubmission,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{error, info, instrument, warn};

use crate::executors::NotebookExecutor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    /// 处理任务时出现未捕获错误，随后回到 Idle
    Error,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerStatus::Idle => "idle",
            WorkerStatus::Busy => "busy",
            WorkerStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// 评分Worker
///
/// 一次只处理一个任务，持有独立的执行器实例。
pub struct AutogradingWorker {
    id: String,
    executor: Arc<dyn NotebookExecutor>,
    status: RwLock<WorkerStatus>,
    current_job: RwLock<Option<String>>,
    processed_jobs: AtomicU64,
    failed_jobs: AtomicU64,
}

impl AutogradingWorker {
    pub fn new(id: impl Into<String>, executor: Arc<dyn NotebookExecutor>) -> Self {
        Self {
            id: id.into(),
            executor,
            status: RwLock::new(WorkerStatus::Idle),
            current_job: RwLock::new(None),
            processed_jobs: AtomicU64::new(0),
            failed_jobs: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    pub async fn status(&self) -> WorkerStatus {
        *self.status.read().await
    }

    pub async fn current_job(&self) -> Option<String> {
        self.current_job.read().await.clone()
    }

    pub fn processed_jobs(&self) -> u64 {
        self.processed_jobs.load(Ordering::Relaxed)
    }

    pub fn failed_jobs(&self) -> u64 {
        self.failed_jobs.load(Ordering::Relaxed)
    }

    async fn set_status(&self, status: WorkerStatus) {
        *self.status.write().await = status;
    }

    /// 处理一个评分任务，把每个单元格的执行结果写入任务的成绩累加器
    ///
    /// 出错时任务保持未完成并记录错误，错误向上传播。
    /// 无论结果如何，Worker最终都回到 Idle。
    #[instrument(skip_all, fields(worker_id = %self.id, job_id = %job.id, submission_id = %job.submission_id))]
    pub async fn process_job(&self, job: &mut Job) -> GradingResult<()> {
        self.set_status(WorkerStatus::Busy).await;
        *self.current_job.write().await = Some(job.id.clone());

        info!("开始处理任务 {}，提交 {}", job.id, job.submission_id);
        let result = self.grade(job).await;

        match &result {
            Ok(()) => {
                self.processed_jobs.fetch_add(1, Ordering::Relaxed);
                info!(
                    "任务 {} 处理完成，共 {} 条成绩",
                    job.id,
                    job.grade_count()
                );
            }
            Err(e) => {
                error!("处理任务 {} 失败: {}", job.id, e);
                self.set_status(WorkerStatus::Error).await;
                self.failed_jobs.fetch_add(1, Ordering::Relaxed);
                if let Err(transition) = job.mark_failed(e.to_string()) {
                    warn!("无法将任务标记为失败: {}", transition);
                }
            }
        }

        *self.current_job.write().await = None;
        self.set_status(WorkerStatus::Idle).await;
        result
    }

    async fn grade(&self, job: &mut Job) -> GradingResult<()> {
        job.mark_started()?;

        let assignment = job.assignment.clone();
        for notebook in &assignment.notebooks {
            let Some(notebook_submission) = job
                .submission
                .notebook_submission_for(&notebook.id)
                .cloned()
            else {
                continue;
            };
            self.grade_notebook(job, notebook, &notebook_submission).await?;
        }

        job.mark_completed()
    }

    async fn grade_notebook(
        &self,
        job: &mut Job,
        notebook: &Notebook,
        notebook_submission: &NotebookSubmission,
    ) -> GradingResult<()> {
        let execution_notebook = ExecutionNotebook::reconstruct(notebook, notebook_submission);
        let scope = execution_notebook.cell_ids();

        let results = match self
            .executor
            .execute_notebook(&execution_notebook, Some(&scope))
            .await?
        {
            NotebookRun::Completed(results) => results,
            NotebookRun::Aborted { reason } => {
                error!(
                    "笔记本 {} 执行失败，本次不更新任何成绩: {}",
                    notebook.id, reason
                );
                job.record_ungraded(&notebook_submission.id, reason);
                return Ok(());
            }
        };

        for (cell_id, result) in results {
            let Some(cell) = notebook.find_cell(&cell_id) else {
                warn!("执行结果中的单元格 {} 不属于笔记本 {}", cell_id, notebook.id);
                continue;
            };

            if let Some(err) = result.error() {
                warn!(
                    assignment_id = %job.assignment.id,
                    notebook_id = %notebook.id,
                    cell_id = %cell_id,
                    "单元格执行失败: {}",
                    err
                );
            }

            if !cell.is_grade {
                continue;
            }

            let grade = job.get_or_create_grade(&notebook_submission.id, &cell_id);
            match result.error() {
                None => grade.record_success(cell.max_score),
                Some(err) => grade.record_failure(err.detail()),
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for AutogradingWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutogradingWorker")
            .field("id", &self.id)
            .field("executor", &self.executor.name())
            .finish()
    }
}
