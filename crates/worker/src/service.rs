use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use autograder_config::AutogradeConfig;
use autograder_domain::{
    Assignment, GradeRepository, GradingError, GradingResult, Job, ScoreReporter, ScoreSummary,
    Submission,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::executor_factory::ExecutorFactory;
use crate::executors::NotebookExecutor;
use crate::queue::JobQueue;
use crate::worker::AutogradingWorker;

/// 自动评分服务构建器
pub struct AutogradingServiceBuilder {
    config: AutogradeConfig,
    repository: Arc<dyn GradeRepository>,
    reporter: Option<Arc<dyn ScoreReporter>>,
    executors: Option<Vec<Arc<dyn NotebookExecutor>>>,
}

impl AutogradingServiceBuilder {
    pub fn new(config: AutogradeConfig, repository: Arc<dyn GradeRepository>) -> Self {
        Self {
            config,
            repository,
            reporter: None,
            executors: None,
        }
    }

    /// 设置外部成绩上报客户端
    pub fn score_reporter(mut self, reporter: Arc<dyn ScoreReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// 直接指定每个Worker的执行器，Worker数量等于执行器数量
    pub fn executors(mut self, executors: Vec<Arc<dyn NotebookExecutor>>) -> Self {
        self.executors = Some(executors);
        self
    }

    /// 构建服务，执行器资源缺失时立即失败
    pub fn build(self) -> GradingResult<AutogradingService> {
        let executors = match self.executors {
            Some(executors) => executors,
            None => ExecutorFactory::new(self.config.executor.clone())
                .create_executors(self.config.workers)?,
        };
        if executors.is_empty() {
            return Err(GradingError::config_error("至少需要一个Worker"));
        }

        let workers: Vec<Arc<AutogradingWorker>> = executors
            .into_iter()
            .enumerate()
            .map(|(i, executor)| Arc::new(AutogradingWorker::new(format!("worker-{i}"), executor)))
            .collect();

        info!(
            "自动评分服务已创建: workers={}, queue_capacity={}, executor={}",
            workers.len(),
            self.config.queue_capacity,
            self.config.executor.kind
        );

        Ok(AutogradingService {
            inner: Arc::new(ServiceInner {
                queue: Arc::new(JobQueue::new(self.config.queue_capacity)),
                workers,
                repository: self.repository,
                reporter: self.reporter,
                running: AtomicBool::new(false),
            }),
            handles: Mutex::new(Vec::new()),
        })
    }
}

struct ServiceInner {
    queue: Arc<JobQueue>,
    workers: Vec<Arc<AutogradingWorker>>,
    repository: Arc<dyn GradeRepository>,
    reporter: Option<Arc<dyn ScoreReporter>>,
    running: AtomicBool,
}

/// 自动评分服务
///
/// 持有一个任务队列和固定数量的Worker，负责提交任务、持久化结果以及上报汇总分数。
pub struct AutogradingService {
    inner: Arc<ServiceInner>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl AutogradingService {
    pub fn builder(
        config: AutogradeConfig,
        repository: Arc<dyn GradeRepository>,
    ) -> AutogradingServiceBuilder {
        AutogradingServiceBuilder::new(config, repository)
    }

    /// 启动所有Worker循环，重复调用无效果
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if self.inner.running.swap(true, Ordering::SeqCst) {
            debug!("自动评分服务已在运行");
            return;
        }

        info!("启动自动评分服务: {} 个Worker", self.inner.workers.len());
        for worker in &self.inner.workers {
            let inner = Arc::clone(&self.inner);
            let worker = Arc::clone(worker);
            handles.push(tokio::spawn(async move {
                inner.worker_loop(worker).await;
            }));
        }
    }

    /// 取消所有Worker循环并等待其结束，正在处理的任务被放弃。重复调用无效果
    pub async fn stop(&self) {
        let mut handles = self.handles.lock().await;
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        info!("停止自动评分服务");
        for handle in handles.iter() {
            handle.abort();
        }
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("Worker循环异常退出: {}", e);
                }
            }
        }
        info!("自动评分服务已停止");
    }

    /// 提交评分请求，立即返回任务ID
    ///
    /// 队列满时等待空位。服务未启动时返回 [`GradingError::ServiceNotRunning`]。
    pub async fn submit_for_grading(
        &self,
        assignment: Assignment,
        submission: Submission,
    ) -> GradingResult<String> {
        if !self.is_running() {
            warn!(
                "服务未运行，拒绝评分请求: assignment={}, submission={}",
                assignment.id, submission.id
            );
            return Err(GradingError::ServiceNotRunning);
        }

        debug!(
            "提交评分请求: assignment={}, submission={}",
            assignment.id, submission.id
        );
        let job = Job::new(assignment, submission);
        let job_id = job.id.clone();
        self.inner.queue.enqueue(job).await?;
        Ok(job_id)
    }

    /// 等待所有已提交的任务处理完毕
    pub async fn wait_idle(&self) {
        self.inner.queue.join().await;
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.inner.workers.len()
    }

    pub fn workers(&self) -> &[Arc<AutogradingWorker>] {
        &self.inner.workers
    }

    pub fn queue(&self) -> &JobQueue {
        &self.inner.queue
    }
}

/// 任务结束（包括被取消）时标记队列条目完成
struct TaskDoneGuard<'a>(&'a JobQueue);

impl Drop for TaskDoneGuard<'_> {
    fn drop(&mut self) {
        self.0.task_done();
    }
}

impl ServiceInner {
    async fn worker_loop(&self, worker: Arc<AutogradingWorker>) {
        info!("Worker {} 已启动", worker.id());

        while self.running.load(Ordering::SeqCst) {
            let mut job = match self.queue.dequeue().await {
                Ok(job) => job,
                Err(e) => {
                    error!("Worker {} 无法获取任务: {}", worker.id(), e);
                    break;
                }
            };
            let _done = TaskDoneGuard(&self.queue);

            if let Err(e) = self.handle_job(&worker, &mut job).await {
                error!("Worker {} 处理任务 {} 出错: {}", worker.id(), job.id, e);
            }
        }

        info!("Worker {} 已停止", worker.id());
    }

    async fn handle_job(&self, worker: &AutogradingWorker, job: &mut Job) -> GradingResult<()> {
        worker.process_job(job).await?;
        if let Err(e) = self.save_results(job).await {
            if let Err(transition) = job.mark_persistence_failed(e.to_string()) {
                warn!("无法将任务标记为失败: {}", transition);
            }
            return Err(e);
        }
        Ok(())
    }

    /// 事务性地保存成绩并推进提交状态，随后尝试上报汇总分数
    #[instrument(skip_all, fields(job_id = %job.id, submission_id = %job.submission_id, assignment_id = %job.assignment.id))]
    async fn save_results(&self, job: &Job) -> GradingResult<()> {
        let grades = job.all_grades();
        if let Err(e) = self
            .repository
            .save_results(&job.submission_id, &grades)
            .await
        {
            error!("保存任务 {} 的评分结果失败: {}", job.id, e);
            return Err(e);
        }
        info!("提交 {} 已评分，保存 {} 条成绩", job.submission_id, grades.len());

        for ungraded in &job.ungraded_notebooks {
            warn!(
                notebook_submission_id = %ungraded.notebook_submission_id,
                "笔记本因执行失败未评分: {}",
                ungraded.reason
            );
        }

        // 上报失败不回滚已提交的评分
        if let Err(e) = self.report_score(job).await {
            error!("任务 {} 成绩上报失败: {}", job.id, e);
        }
        Ok(())
    }

    async fn report_score(&self, job: &Job) -> GradingResult<()> {
        let Some(reporter) = &self.reporter else {
            return Ok(());
        };
        let Some(link) = job.assignment.external_link() else {
            return Ok(());
        };
        let user_id = job.submission.lms_user_id.as_deref().ok_or_else(|| {
            GradingError::reporting_error(format!("提交 {} 缺少外部用户ID", job.submission_id))
        })?;

        let grades = self
            .repository
            .find_grades_by_submission(&job.submission_id)
            .await?;
        let summary = ScoreSummary::compute(&job.assignment, &grades);
        if summary.max_possible <= 0.0 {
            warn!("作业 {} 没有可评分的分值，上报 0 分", job.assignment.id);
        }

        debug!(
            "上报成绩: assignment={}, achieved={}, max={}, sent={}",
            link.assignment_id, summary.achieved, summary.max_possible, summary.reported
        );
        reporter
            .submit_score(
                link.course_id,
                link.assignment_id,
                user_id,
                summary.reported,
                summary.score_max(),
            )
            .await?;

        info!(
            "成绩已上报: assignment={}, user={}, score={}",
            link.assignment_id, user_id, summary.reported
        );
        Ok(())
    }
}
