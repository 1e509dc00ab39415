use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use crate::db::RecordFetcher;
use crate::error::{GradeError, GradeWarning};
use crate::models::{FetchedRecord, GradeReport, ModuleGrades, StudentResult};

/// Fetches everything for `module_id` and aggregates it. The fetch must
/// finish before any aggregation happens.
pub async fn grade_module<F>(fetcher: &F, module_id: &str) -> Result<ModuleGrades, GradeError>
where
    F: RecordFetcher + ?Sized,
{
    let module = fetcher.fetch_module(module_id).await?;
    let records = fetcher.fetch_records(module_id).await?;
    debug!(module_id, records = records.len(), "module records fetched");

    let report = compute_grades(&records);
    Ok(ModuleGrades {
        module,
        records,
        report,
    })
}

struct Chosen<'a> {
    record: &'a FetchedRecord,
    weight: f64,
    count: usize,
}

struct StudentEntry<'a> {
    name: &'a str,
    module_title: &'a str,
    components: BTreeMap<&'a str, Chosen<'a>>,
    warnings: Vec<GradeWarning>,
}

impl<'a> StudentEntry<'a> {
    fn new(record: &'a FetchedRecord) -> Self {
        Self {
            name: &record.student_name,
            module_title: &record.module_title,
            components: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    fn check_consistent(&mut self, record: &FetchedRecord) {
        if record.student_name != self.name {
            self.inconsistency(record, "student_name", self.name, &record.student_name);
        }
        if record.module_title != self.module_title {
            self.inconsistency(record, "module_title", self.module_title, &record.module_title);
        }
    }

    fn inconsistency(&mut self, record: &FetchedRecord, field: &str, kept: &str, conflicting: &str) {
        self.warnings.push(GradeWarning::DataInconsistency {
            student_id: record.student_id.clone(),
            field: field.to_string(),
            kept: kept.to_string(),
            conflicting: conflicting.to_string(),
        });
    }
}

/// Weighted module totals per student, ordered by student id.
///
/// Each `(student, component)` pair contributes at most once: when any record
/// in the group carries a sequence token the largest token wins, otherwise the
/// highest usable mark wins. A mark `m` on a component of weight `w` adds
/// `m * w / 100`. Absent or non-finite marks add nothing and are reported;
/// records without a component weight are orphans and are dropped.
pub fn compute_grades(records: &[FetchedRecord]) -> GradeReport {
    let mut students: BTreeMap<&str, StudentEntry> = BTreeMap::new();
    let mut weights: HashMap<&str, f64> = HashMap::new();

    for record in records {
        let entry = students
            .entry(record.student_id.as_str())
            .or_insert_with(|| StudentEntry::new(record));
        entry.check_consistent(record);

        let Some(weight) = record.weight.filter(|w| w.is_finite()) else {
            entry.warnings.push(GradeWarning::OrphanedScore {
                student_id: record.student_id.clone(),
                component_id: record.component_id.clone(),
            });
            continue;
        };

        let canonical = *weights
            .entry(record.component_id.as_str())
            .or_insert(weight);
        if canonical != weight {
            entry.inconsistency(
                record,
                &format!("weight of {}", record.component_id),
                &canonical.to_string(),
                &weight.to_string(),
            );
        }

        match entry.components.entry(record.component_id.as_str()) {
            Entry::Vacant(slot) => {
                slot.insert(Chosen {
                    record,
                    weight: canonical,
                    count: 1,
                });
            }
            Entry::Occupied(mut slot) => {
                let chosen = slot.get_mut();
                chosen.count += 1;
                if supersedes(record, chosen.record) {
                    chosen.record = record;
                }
            }
        }
    }

    let mut report = GradeReport::default();

    for (student_id, entry) in students {
        let mut warnings = entry.warnings;
        let mut total = 0.0;
        let mut scored_weight = 0.0;
        let mut scored = false;

        for (component_id, chosen) in &entry.components {
            if chosen.count > 1 {
                warnings.push(GradeWarning::DuplicateRecord {
                    student_id: student_id.to_string(),
                    component_id: component_id.to_string(),
                    count: chosen.count,
                });
            }

            match chosen.record.mark {
                Some(mark) if mark.is_finite() => {
                    total += mark * chosen.weight / 100.0;
                    scored_weight += chosen.weight;
                    scored = true;
                }
                Some(mark) => warnings.push(GradeWarning::InvalidMark {
                    student_id: student_id.to_string(),
                    component_id: component_id.to_string(),
                    mark,
                }),
                None => warnings.push(GradeWarning::MissingScore {
                    student_id: student_id.to_string(),
                    component_id: component_id.to_string(),
                }),
            }
        }

        for warning in &warnings {
            warn!(student_id, %warning, "grade data issue");
        }
        report.warnings.extend(warnings);

        if entry.components.is_empty() {
            continue;
        }

        report.results.push(StudentResult {
            student_id: student_id.to_string(),
            student_name: entry.name.to_string(),
            module_title: entry.module_title.to_string(),
            total_score: scored.then(|| round_half_even(total, 2)),
            scored_weight: round_half_even(scored_weight, 2),
        });
    }

    report
}

/// Sequenced records outrank unsequenced ones, the largest sequence wins and
/// the higher usable mark breaks ties. Equal keys imply equal marks, so the
/// outcome does not depend on arrival order.
fn supersedes(candidate: &FetchedRecord, current: &FetchedRecord) -> bool {
    reduction_key(candidate) > reduction_key(current)
}

fn reduction_key(record: &FetchedRecord) -> (Option<i64>, Option<f64>) {
    (record.sequence, usable_mark(record.mark))
}

fn usable_mark(mark: Option<f64>) -> Option<f64> {
    mark.filter(|m| m.is_finite())
}

/// Rounds to `places` decimals, ties to the even neighbour.
pub fn round_half_even(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round_ties_even() / factor
}
