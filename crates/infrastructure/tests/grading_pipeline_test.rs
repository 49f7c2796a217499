use std::sync::Arc;
use std::time::Duration;

use autograder_config::AutogradeConfig;
use autograder_domain::{
    Assignment, Cell, CellSubmission, CellType, GradeRepository, Notebook, NotebookSubmission,
    Submission, SubmissionRepository, SubmissionStatus,
};
use autograder_infrastructure::{DatabaseManager, SqliteGradeRepository, SqliteSubmissionRepository};
use autograder_worker::AutogradingService;
use sqlx::sqlite::SqlitePoolOptions;

fn gradable(id: &str, idx: i32) -> Cell {
    Cell {
        id: id.to_string(),
        idx,
        cell_type: CellType::Code,
        source: Some("assert answer == 42".to_string()),
        source_student: None,
        meta: None,
        max_score: 2.0,
        is_grade: true,
        is_solution: true,
    }
}

fn assignment() -> Assignment {
    Assignment {
        id: "a-1".to_string(),
        name: "Lab".to_string(),
        lti_id: None,
        course_lti_id: None,
        score_maximum: None,
        notebooks: vec![
            Notebook {
                id: "nb-1".to_string(),
                name: "part1.ipynb".to_string(),
                idx: 0,
                kernelspec: None,
                cells: vec![gradable("q1", 0), gradable("q2", 1)],
            },
            Notebook {
                id: "nb-2".to_string(),
                name: "part2.ipynb".to_string(),
                idx: 1,
                kernelspec: None,
                cells: vec![gradable("q3", 0)],
            },
        ],
    }
}

fn submission() -> Submission {
    Submission {
        id: "s-1".to_string(),
        assignment_id: "a-1".to_string(),
        user_id: "u-1".to_string(),
        lms_user_id: None,
        status: SubmissionStatus::Submitted,
        notebook_submissions: vec![
            NotebookSubmission {
                id: "ns-1".to_string(),
                notebook_id: "nb-1".to_string(),
                cell_submissions: vec![CellSubmission {
                    cell_id: "q1".to_string(),
                    submitted_source: "answer = 42".to_string(),
                }],
            },
            NotebookSubmission {
                id: "ns-2".to_string(),
                notebook_id: "nb-2".to_string(),
                cell_submissions: Vec::new(),
            },
        ],
    }
}

#[tokio::test]
async fn test_mock_pipeline_persists_grades_in_sqlite() {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    DatabaseManager::from_pool(pool.clone()).migrate().await.unwrap();

    let submissions = SqliteSubmissionRepository::new(pool.clone());
    submissions.register(&submission()).await.unwrap();
    let grades = Arc::new(SqliteGradeRepository::new(pool));

    let config = AutogradeConfig {
        workers: 2,
        queue_capacity: 4,
        ..Default::default()
    };
    let service = AutogradingService::builder(config, grades.clone())
        .build()
        .unwrap();
    service.start().await;

    service
        .submit_for_grading(assignment(), submission())
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), service.wait_idle())
        .await
        .unwrap();
    service.stop().await;

    let stored = submissions.find_by_id("s-1").await.unwrap().unwrap();
    assert_eq!(stored.status, SubmissionStatus::Graded);

    let saved = grades.find_grades_by_submission("s-1").await.unwrap();
    assert_eq!(saved.len(), 3);
    assert!(saved.iter().all(|g| g.auto_score == Some(2.0)));
    assert!(saved.iter().all(|g| !g.needs_manual_grading));
    let total: f64 = saved.iter().map(|g| g.final_score()).sum();
    assert_eq!(total, assignment().max_possible_score());
}
