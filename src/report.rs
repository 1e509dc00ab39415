use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{CategorySummary, FetchedRecord, ModuleGrades, StudentResult};

/// Renders one result as `name (id): total%`.
pub fn format_result(result: &StudentResult) -> String {
    match result.total_score {
        Some(total) => format!("{} ({}): {:.2}%", result.student_name, result.student_id, total),
        None => format!("{} ({}): n/a", result.student_name, result.student_id),
    }
}

pub fn summarize_by_category(records: &[FetchedRecord]) -> Vec<CategorySummary> {
    let mut map: HashMap<&str, (BTreeSet<&str>, usize, f64)> = HashMap::new();

    for record in records.iter().filter(|r| r.weight.is_some()) {
        let entry = map
            .entry(record.category.as_str())
            .or_insert_with(|| (BTreeSet::new(), 0, 0.0));
        entry.0.insert(record.component_id.as_str());
        if let Some(mark) = record.mark.filter(|m| m.is_finite()) {
            entry.1 += 1;
            entry.2 += mark;
        }
    }

    let mut summaries: Vec<CategorySummary> = map
        .into_iter()
        .map(|(category, (components, scored_count, total_mark))| CategorySummary {
            category: category.to_string(),
            component_count: components.len(),
            scored_count,
            avg_mark: if scored_count == 0 {
                None
            } else {
                Some(total_mark / scored_count as f64)
            },
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.scored_count
            .cmp(&a.scored_count)
            .then_with(|| a.category.cmp(&b.category))
    });
    summaries
}

pub fn build_report(grades: &ModuleGrades, generated_on: NaiveDate) -> String {
    let module = &grades.module;
    let summaries = summarize_by_category(&grades.records);

    let mut output = String::new();
    let section_label = module.section.as_deref().unwrap_or("no section");

    let _ = writeln!(output, "# Module Grade Report");
    let _ = writeln!(
        output,
        "Generated for {} ({}, {}) on {}",
        module.title, module.module_id, section_label, generated_on
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Components");

    if module.components.is_empty() {
        let _ = writeln!(output, "No graded components defined.");
    } else {
        for component in &module.components {
            let _ = writeln!(
                output,
                "- {} ({}): {:.1}%",
                component.component_id, component.category, component.weight
            );
        }
        let total_weight = module.total_weight();
        let _ = writeln!(output, "Total weight: {:.1}%", total_weight);
        if (total_weight - 100.0).abs() > 1e-6 {
            let _ = writeln!(output, "Weights do not sum to 100%.");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Category Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No scores recorded for this module.");
    } else {
        for summary in &summaries {
            let avg = summary
                .avg_mark
                .map(|m| format!("{m:.1}"))
                .unwrap_or_else(|| "n/a".to_string());
            let _ = writeln!(
                output,
                "- {}: {} components, {} marks (avg {})",
                summary.category, summary.component_count, summary.scored_count, avg
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Student Results");

    if grades.report.results.is_empty() {
        let _ = writeln!(output, "No students have scores in this module.");
    } else {
        for result in &grades.report.results {
            let _ = writeln!(output, "- {}", format_result(result));
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Data Quality");

    if grades.report.warnings.is_empty() {
        let _ = writeln!(output, "No issues found.");
    } else {
        for warning in &grades.report.warnings {
            let _ = writeln!(output, "- {warning}");
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::compute_grades;
    use crate::models::{GradedComponent, ModuleInfo};

    fn record(student_id: &str, component_id: &str, category: &str, mark: Option<f64>) -> FetchedRecord {
        FetchedRecord {
            student_id: student_id.to_string(),
            student_name: "Jane Smith".to_string(),
            component_id: component_id.to_string(),
            category: category.to_string(),
            weight: Some(50.0),
            module_title: "Introduction to Programming".to_string(),
            mark,
            sequence: None,
        }
    }

    fn grades(records: Vec<FetchedRecord>) -> ModuleGrades {
        let report = compute_grades(&records);
        ModuleGrades {
            module: ModuleInfo {
                module_id: "CS101".to_string(),
                title: "Introduction to Programming".to_string(),
                section: Some("Morning Session".to_string()),
                components: vec![
                    GradedComponent {
                        component_id: "Q1".to_string(),
                        category: "quiz".to_string(),
                        weight: 50.0,
                    },
                    GradedComponent {
                        component_id: "HW1".to_string(),
                        category: "homework".to_string(),
                        weight: 40.0,
                    },
                ],
            },
            records,
            report,
        }
    }

    #[test]
    fn formats_result_line() {
        let result = StudentResult {
            student_id: "S2".to_string(),
            student_name: "Jane Smith".to_string(),
            module_title: "Introduction to Programming".to_string(),
            total_score: Some(89.5),
            scored_weight: 100.0,
        };
        assert_eq!(format_result(&result), "Jane Smith (S2): 89.50%");

        let unscored = StudentResult {
            total_score: None,
            ..result
        };
        assert_eq!(format_result(&unscored), "Jane Smith (S2): n/a");
    }

    #[test]
    fn summarizes_categories() {
        let records = vec![
            record("S1", "Q1", "quiz", Some(80.0)),
            record("S2", "Q1", "quiz", Some(90.0)),
            record("S1", "HW1", "homework", None),
        ];
        let summaries = summarize_by_category(&records);
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].category, "quiz");
        assert_eq!(summaries[0].component_count, 1);
        assert_eq!(summaries[0].avg_mark, Some(85.0));
        assert_eq!(summaries[1].category, "homework");
        assert_eq!(summaries[1].avg_mark, None);
    }

    #[test]
    fn report_lists_results_and_data_quality() {
        let records = vec![
            record("S1", "Q1", "quiz", Some(80.0)),
            record("S1", "HW1", "homework", None),
        ];
        let date = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        let report = build_report(&grades(records), date);

        assert!(report.contains("Generated for Introduction to Programming (CS101, Morning Session) on 2026-02-02"));
        assert!(report.contains("Total weight: 90.0%"));
        assert!(report.contains("Weights do not sum to 100%."));
        assert!(report.contains("- Jane Smith (S1): 40.00%"));
        assert!(report.contains("- S1: no mark recorded for HW1"));
    }

    #[test]
    fn empty_module_report() {
        let date = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();
        let report = build_report(&grades(Vec::new()), date);
        assert!(report.contains("No students have scores in this module."));
        assert!(report.contains("No issues found."));
    }
}
