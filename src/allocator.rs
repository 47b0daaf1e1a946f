// src/allocator.rs

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Valid working-day names, in week order.
pub const WEEK_DAYS: [&str; 6] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// One roster entry as the allocator sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterTeacher {
    pub id: i64,
    pub name: String,
    /// Subject names this teacher may be scheduled for.
    #[serde(default)]
    pub subjects: Vec<String>,
}

/// A class and its sections. Each section gets its own grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassGroup {
    pub name: String,
    pub sections: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeriodKind {
    Regular,
    Break,
    Lunch,
}

impl PeriodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Regular => "regular",
            PeriodKind::Break => "break",
            PeriodKind::Lunch => "lunch",
        }
    }
}

fn default_kind() -> PeriodKind {
    PeriodKind::Regular
}

/// One slot of the daily grid. Break/lunch slots are display placeholders;
/// only regular slots are schedulable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodSlot {
    pub number: i64,
    pub start_time: String,
    pub end_time: String,
    #[serde(default = "default_kind")]
    pub kind: PeriodKind,
}

/// Soft constraints: honored best-effort, never at the cost of the hard
/// invariants (no double-booking, subject-teacher fit, quota ceiling).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftConstraints {
    /// Cap on back-to-back periods for one teacher within a day. Relaxed
    /// when no alternative teacher is free.
    #[serde(default)]
    pub max_consecutive_periods: Option<u32>,
    /// Avoid giving a class the same subject twice in a row.
    #[serde(default = "default_true")]
    pub avoid_repeat_subjects: bool,
    /// Subjects to prefer in the first half of each day's regular periods.
    #[serde(default)]
    pub morning_subjects: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for SoftConstraints {
    fn default() -> Self {
        SoftConstraints {
            max_consecutive_periods: None,
            avoid_repeat_subjects: true,
            morning_subjects: Vec::new(),
        }
    }
}

/// Full configuration for one allocation run. No hidden defaults: quotas
/// are per subject per section per week.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationInput {
    pub teachers: Vec<RosterTeacher>,
    pub classes: Vec<ClassGroup>,
    pub working_days: Vec<String>,
    pub periods: Vec<PeriodSlot>,
    pub subject_hours_per_week: HashMap<String, u32>,
    #[serde(default)]
    pub constraints: SoftConstraints,
}

/// One (day, period) cell of a generated grid. `subject` is `None` for
/// break/lunch placeholders and for regular cells the allocator could not
/// fill.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellAssignment {
    pub day: String,
    pub period_number: i64,
    pub start_time: String,
    pub end_time: String,
    pub kind: PeriodKind,
    pub subject: Option<String>,
    pub teacher_id: Option<i64>,
    pub teacher_name: Option<String>,
}

/// The generated weekly grid for one class-section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionGrid {
    pub class_name: String,
    pub section: String,
    pub cells: Vec<CellAssignment>,
    /// Regular cells left empty. Reported so staff know manual
    /// intervention is needed.
    pub unassigned: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AllocationSummary {
    /// Assigned regular cells across every grid.
    pub total_periods: u32,
    pub classes_scheduled: u32,
    pub unassigned: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Allocation {
    pub grids: Vec<SectionGrid>,
    pub summary: AllocationSummary,
}

/// Slot occupancy across the whole school: (day index, period number,
/// teacher id). Built fresh per run and threaded through every section so
/// a teacher is never booked twice in the same slot.
type BusySet = HashSet<(usize, i64, i64)>;

/// Assigns (subject, teacher) pairs to every regular cell of every
/// class-section grid.
///
/// Iteration order is fixed (classes in input order, then sections, days,
/// periods), and every tie-break is deterministic, so identical inputs
/// produce identical grids. Cells with no eligible pair are left empty and
/// counted rather than failing the run.
pub fn allocate(input: &AllocationInput) -> Allocation {
    run_allocation(input, HashSet::new())
}

/// Like [`allocate`], but seeded with bookings already persisted for
/// timetables outside this run. Regenerating a subset of a school's classes
/// must not double-book a teacher against grids that are left untouched.
/// Each booking is (day, period number, teacher id); days not in
/// `working_days` are ignored.
pub fn allocate_with_existing(
    input: &AllocationInput,
    existing: &[(String, i64, i64)],
) -> Allocation {
    let mut busy: BusySet = HashSet::new();
    for (day, period_number, teacher_id) in existing {
        if let Some(day_idx) = input.working_days.iter().position(|d| d == day) {
            busy.insert((day_idx, *period_number, *teacher_id));
        }
    }
    run_allocation(input, busy)
}

fn run_allocation(input: &AllocationInput, mut busy: BusySet) -> Allocation {
    let mut grids: Vec<SectionGrid> = Vec::new();

    for class in &input.classes {
        for section in &class.sections {
            grids.push(allocate_section(input, &class.name, section, &mut busy));
        }
    }

    let total_periods = grids
        .iter()
        .flat_map(|g| &g.cells)
        .filter(|c| c.subject.is_some())
        .count() as u32;
    let unassigned = grids.iter().map(|g| g.unassigned).sum();

    Allocation {
        summary: AllocationSummary {
            total_periods,
            classes_scheduled: grids.len() as u32,
            unassigned,
        },
        grids,
    }
}

fn allocate_section(
    input: &AllocationInput,
    class_name: &str,
    section: &str,
    busy: &mut BusySet,
) -> SectionGrid {
    // Fresh weekly quota for this section.
    let mut remaining: HashMap<&str, u32> = input
        .subject_hours_per_week
        .iter()
        .filter(|(_, target)| **target > 0)
        .map(|(subject, target)| (subject.as_str(), *target))
        .collect();

    let regular_count = input
        .periods
        .iter()
        .filter(|p| p.kind == PeriodKind::Regular)
        .count();
    let morning_cutoff = regular_count.div_ceil(2);

    let mut cells: Vec<CellAssignment> = Vec::new();
    let mut unassigned: u32 = 0;

    for (day_idx, day) in input.working_days.iter().enumerate() {
        let mut prev_subject: Option<String> = None;
        let mut regular_seen: usize = 0;

        for (period_idx, period) in input.periods.iter().enumerate() {
            if period.kind != PeriodKind::Regular {
                // Fixed placeholder, baked into the grid for display.
                cells.push(CellAssignment {
                    day: day.clone(),
                    period_number: period.number,
                    start_time: period.start_time.clone(),
                    end_time: period.end_time.clone(),
                    kind: period.kind,
                    subject: None,
                    teacher_id: None,
                    teacher_name: None,
                });
                // A break interrupts any back-to-back chain.
                prev_subject = None;
                continue;
            }

            let is_morning = regular_seen < morning_cutoff;
            regular_seen += 1;

            let picked = pick_assignment(
                input,
                &remaining,
                prev_subject.as_deref(),
                is_morning,
                day_idx,
                period_idx,
                busy,
            );

            match picked {
                Some((subject, teacher)) => {
                    busy.insert((day_idx, period.number, teacher.id));
                    if let Some(left) = remaining.get_mut(subject) {
                        *left -= 1;
                    }
                    cells.push(CellAssignment {
                        day: day.clone(),
                        period_number: period.number,
                        start_time: period.start_time.clone(),
                        end_time: period.end_time.clone(),
                        kind: PeriodKind::Regular,
                        subject: Some(subject.to_string()),
                        teacher_id: Some(teacher.id),
                        teacher_name: Some(teacher.name.clone()),
                    });
                    prev_subject = Some(subject.to_string());
                }
                None => {
                    // Quotas exhausted or every capable teacher already
                    // booked in this slot. Leave the cell empty.
                    unassigned += 1;
                    cells.push(CellAssignment {
                        day: day.clone(),
                        period_number: period.number,
                        start_time: period.start_time.clone(),
                        end_time: period.end_time.clone(),
                        kind: PeriodKind::Regular,
                        subject: None,
                        teacher_id: None,
                        teacher_name: None,
                    });
                    prev_subject = None;
                }
            }
        }
    }

    if unassigned > 0 {
        tracing::warn!(
            "Timetable {}-{}: {} periods left unassigned",
            class_name,
            section,
            unassigned
        );
    }

    SectionGrid {
        class_name: class_name.to_string(),
        section: section.to_string(),
        cells,
        unassigned,
    }
}

/// Chooses a (subject, teacher) pair for one cell, or `None` when no pair
/// satisfies the hard invariants.
///
/// Candidate subjects are ranked: back-to-back repeats demoted, morning
/// subjects promoted in morning slots, then by the largest
/// remaining-to-target quota ratio (spreads subjects across the week
/// instead of clustering them at its start), with the subject name as the
/// final tie-break.
fn pick_assignment<'a>(
    input: &'a AllocationInput,
    remaining: &HashMap<&'a str, u32>,
    prev_subject: Option<&str>,
    is_morning: bool,
    day_idx: usize,
    period_idx: usize,
    busy: &BusySet,
) -> Option<(&'a str, &'a RosterTeacher)> {
    let constraints = &input.constraints;

    let mut candidates: Vec<(&'a str, u32)> = remaining
        .iter()
        .filter(|(_, left)| **left > 0)
        .map(|(subject, left)| (*subject, *left))
        .collect();

    let rank = |subject: &str, left: u32| -> (u8, u8, f64) {
        let repeat = u8::from(constraints.avoid_repeat_subjects && prev_subject == Some(subject));
        let morning = u8::from(
            !(is_morning && constraints.morning_subjects.iter().any(|m| m == subject)),
        );
        let target = input.subject_hours_per_week[subject] as f64;
        (repeat, morning, left as f64 / target)
    };

    candidates.sort_by(|(a, left_a), (b, left_b)| {
        let (rep_a, morn_a, ratio_a) = rank(a, *left_a);
        let (rep_b, morn_b, ratio_b) = rank(b, *left_b);
        rep_a
            .cmp(&rep_b)
            .then(morn_a.cmp(&morn_b))
            .then(ratio_b.partial_cmp(&ratio_a).unwrap_or(Ordering::Equal))
            .then(a.cmp(b))
    });

    for (subject, _) in candidates {
        if let Some(teacher) = pick_teacher(input, subject, day_idx, period_idx, busy) {
            return Some((subject, teacher));
        }
    }
    None
}

/// First free teacher (in roster order) who teaches the subject, preferring
/// one under the consecutive-periods cap. The cap is soft: when every free
/// teacher is over it, the first of them is still used. Double-booking is
/// never relaxed.
fn pick_teacher<'a>(
    input: &'a AllocationInput,
    subject: &str,
    day_idx: usize,
    period_idx: usize,
    busy: &BusySet,
) -> Option<&'a RosterTeacher> {
    let period = &input.periods[period_idx];
    let mut over_cap: Option<&RosterTeacher> = None;

    for teacher in &input.teachers {
        if !teacher.subjects.iter().any(|s| s == subject) {
            continue;
        }
        if busy.contains(&(day_idx, period.number, teacher.id)) {
            continue;
        }
        match input.constraints.max_consecutive_periods {
            Some(max) if consecutive_run(input, teacher.id, day_idx, period_idx, busy) >= max => {
                over_cap.get_or_insert(teacher);
            }
            _ => return Some(teacher),
        }
    }
    over_cap
}

/// How many regular periods immediately before `period_idx` this teacher is
/// already booked for on the given day, in any class. A break or a free
/// slot ends the run.
fn consecutive_run(
    input: &AllocationInput,
    teacher_id: i64,
    day_idx: usize,
    period_idx: usize,
    busy: &BusySet,
) -> u32 {
    let mut run = 0;
    for slot in input.periods[..period_idx].iter().rev() {
        if slot.kind != PeriodKind::Regular {
            break;
        }
        if busy.contains(&(day_idx, slot.number, teacher_id)) {
            run += 1;
        } else {
            break;
        }
    }
    run
}
