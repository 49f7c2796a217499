mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use autograder_domain::{GradingError, Job, JobState};
use autograder_worker::{AutogradingWorker, WorkerStatus};
use common::{assignment, submission, ScriptedExecutor};

#[tokio::test]
async fn test_process_job_grades_every_gradable_cell() {
    let executor = Arc::new(ScriptedExecutor::failing(&["q2"]));
    let worker = AutogradingWorker::new("worker-0", executor.clone());
    let mut job = Job::new(assignment(), submission("s-1"));

    worker.process_job(&mut job).await.unwrap();

    assert!(job.is_completed());
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());
    assert_eq!(job.grade_count(), 2);

    let grades = &job.grades["s-1-nb-1"];
    let q1 = &grades["q1"];
    assert_eq!(q1.auto_score, Some(5.0));
    assert!(q1.execution_error.is_none());
    assert!(!q1.needs_manual_grading);

    let q2 = &grades["q2"];
    assert_eq!(q2.auto_score, Some(0.0));
    assert!(q2.execution_error.as_deref().unwrap().starts_with("Traceback"));
    assert!(!q2.needs_manual_grading);

    // 非评分单元格照常执行但不产生成绩
    assert!(!grades.contains_key("setup"));

    assert_eq!(worker.status().await, WorkerStatus::Idle);
    assert!(worker.current_job().await.is_none());
    assert_eq!(worker.processed_jobs(), 1);
}

#[tokio::test]
async fn test_process_job_uses_submitted_source() {
    let executor = Arc::new(ScriptedExecutor::default());
    let worker = AutogradingWorker::new("worker-0", executor.clone());
    let mut job = Job::new(assignment(), submission("s-1"));

    worker.process_job(&mut job).await.unwrap();

    let seen = executor.seen.lock().await;
    assert_eq!(seen.len(), 1);
    let sources: Vec<_> = seen[0].cells.iter().map(|c| (c.id.as_str(), c.source.as_str())).collect();
    assert_eq!(
        sources,
        vec![
            ("intro", "# intro"),
            ("setup", "# setup"),
            ("q1", "answer = 42"),
            ("q2", "# stub q2"),
        ]
    );
}

#[tokio::test]
async fn test_notebook_without_submission_is_skipped() {
    let executor = Arc::new(ScriptedExecutor::default());
    let worker = AutogradingWorker::new("worker-0", executor.clone());
    let mut submission = submission("s-1");
    submission.notebook_submissions.clear();
    let mut job = Job::new(assignment(), submission);

    worker.process_job(&mut job).await.unwrap();

    assert!(job.is_completed());
    assert_eq!(job.grade_count(), 0);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_aborted_notebook_is_recorded_as_ungraded() {
    let executor = Arc::new(ScriptedExecutor {
        abort: true,
        ..Default::default()
    });
    let worker = AutogradingWorker::new("worker-0", executor);
    let mut job = Job::new(assignment(), submission("s-1"));

    worker.process_job(&mut job).await.unwrap();

    assert!(job.is_completed());
    assert_eq!(job.grade_count(), 0);
    assert_eq!(job.ungraded_notebooks.len(), 1);
    assert_eq!(job.ungraded_notebooks[0].notebook_submission_id, "s-1-nb-1");
    assert_eq!(job.ungraded_notebooks[0].reason, "memory limit exceeded");
}

#[tokio::test]
async fn test_worker_recovers_after_failed_job() {
    let failing = AutogradingWorker::new(
        "worker-0",
        Arc::new(ScriptedExecutor {
            error: true,
            ..Default::default()
        }),
    );
    let mut job = Job::new(assignment(), submission("s-1"));

    let err = failing.process_job(&mut job).await.unwrap_err();
    assert!(matches!(err, GradingError::Execution(_)));
    assert_eq!(job.state(), JobState::Failed);
    assert!(!job.is_completed());
    assert!(job.error.as_deref().unwrap().contains("executor exploded"));
    assert_eq!(failing.status().await, WorkerStatus::Idle);
    assert!(failing.current_job().await.is_none());
    assert_eq!(failing.failed_jobs(), 1);

    // 同一个Worker继续处理下一个任务
    let mut next = Job::new(assignment(), submission("s-2"));
    let err = failing.process_job(&mut next).await.unwrap_err();
    assert!(matches!(err, GradingError::Execution(_)));
    assert_eq!(failing.failed_jobs(), 2);
    assert_eq!(failing.status().await, WorkerStatus::Idle);
}

#[tokio::test]
async fn test_job_cannot_be_processed_twice() {
    let worker = AutogradingWorker::new("worker-0", Arc::new(ScriptedExecutor::default()));
    let mut job = Job::new(assignment(), submission("s-1"));
    worker.process_job(&mut job).await.unwrap();

    let err = worker.process_job(&mut job).await.unwrap_err();
    assert!(matches!(err, GradingError::InvalidJobTransition { .. }));
    assert!(job.is_completed());
    assert_eq!(worker.status().await, WorkerStatus::Idle);
}
