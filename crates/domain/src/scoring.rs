//! 汇总分数计算
//!
//! 推送到外部评分平台的分数 = clamp(achieved / max_possible, 0, 1) × 外部满分。
//! 没有可评分单元格时直接上报 0，不做除法。

use serde::{Deserialize, Serialize};

use crate::entities::{Assignment, Grade};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScoreSummary {
    /// 所有成绩的最终得分之和
    pub achieved: f64,
    /// 可评分单元格的满分之和
    pub max_possible: f64,
    /// 上报到外部平台的分数
    pub reported: f64,
    /// 外部平台的满分
    pub external_max: f64,
}

impl ScoreSummary {
    pub fn compute(assignment: &Assignment, grades: &[Grade]) -> Self {
        let achieved: f64 = grades.iter().map(Grade::final_score).sum();
        let max_possible = assignment.max_possible_score();
        let external_max = assignment.score_maximum.unwrap_or(max_possible);

        let reported = if max_possible <= 0.0 {
            0.0
        } else {
            (achieved / max_possible).clamp(0.0, 1.0) * external_max
        };

        Self {
            achieved,
            max_possible,
            reported,
            external_max,
        }
    }

    /// 上报给外部平台的满分参数，没有可评分内容时为 None
    pub fn score_max(&self) -> Option<f64> {
        (self.max_possible > 0.0).then_some(self.max_possible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Cell, CellType, Notebook};

    fn gradable(id: &str, max_score: f64) -> Cell {
        Cell {
            id: id.to_string(),
            idx: 0,
            cell_type: CellType::Code,
            source: None,
            source_student: None,
            meta: None,
            max_score,
            is_grade: true,
            is_solution: true,
        }
    }

    fn assignment(cells: Vec<Cell>, score_maximum: Option<f64>) -> Assignment {
        Assignment {
            id: "a-1".to_string(),
            name: "Lab".to_string(),
            lti_id: Some("line-1".to_string()),
            course_lti_id: Some("course-1".to_string()),
            score_maximum,
            notebooks: vec![Notebook {
                id: "nb-1".to_string(),
                name: "lab.ipynb".to_string(),
                idx: 0,
                kernelspec: None,
                cells,
            }],
        }
    }

    #[test]
    fn test_half_credit_scaled_to_external_maximum() {
        let assignment = assignment(vec![gradable("c1", 5.0), gradable("c2", 5.0)], Some(100.0));
        let mut ok = Grade::new("ns-1", "c1");
        ok.record_success(5.0);
        let mut failed = Grade::new("ns-1", "c2");
        failed.record_failure("AssertionError");

        let summary = ScoreSummary::compute(&assignment, &[ok, failed]);
        assert_eq!(summary.achieved, 5.0);
        assert_eq!(summary.max_possible, 10.0);
        assert_eq!(summary.reported, 50.0);
        assert_eq!(summary.score_max(), Some(10.0));
    }

    #[test]
    fn test_no_gradable_cells_reports_zero() {
        let assignment = assignment(Vec::new(), Some(100.0));
        let mut grade = Grade::new("ns-1", "c1");
        grade.extra_credit = 3.0;

        let summary = ScoreSummary::compute(&assignment, &[grade]);
        assert_eq!(summary.max_possible, 0.0);
        assert_eq!(summary.reported, 0.0);
        assert_eq!(summary.score_max(), None);
    }

    #[test]
    fn test_reported_score_is_clamped() {
        let assignment = assignment(vec![gradable("c1", 5.0)], Some(10.0));
        let mut grade = Grade::new("ns-1", "c1");
        grade.record_success(5.0);
        grade.extra_credit = 5.0;

        let summary = ScoreSummary::compute(&assignment, &[grade]);
        assert_eq!(summary.achieved, 10.0);
        assert_eq!(summary.reported, 10.0);
    }

    #[test]
    fn test_external_maximum_defaults_to_max_possible() {
        let assignment = assignment(vec![gradable("c1", 4.0), gradable("c2", 4.0)], None);
        let mut grade = Grade::new("ns-1", "c1");
        grade.record_success(4.0);

        let summary = ScoreSummary::compute(&assignment, &[grade]);
        assert_eq!(summary.external_max, 8.0);
        assert_eq!(summary.reported, 4.0);
    }
}
