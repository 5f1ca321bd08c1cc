//! Cumulative-demand test for EDF over daily working windows.
//!
//! Tasks are taken in deadline order; the minutes demanded by every task due
//! at or before a deadline must fit in the working minutes left between the
//! origin and that deadline once fixed blocks are subtracted.

use crate::domain::error::ScheduleError;
use crate::domain::models::{Block, TimeSlot};
use crate::domain::policy::CalendarPolicy;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feasibility {
    Feasible,
    Infeasible {
        task_id: String,
        task_name: String,
        shortfall_minutes: i64,
    },
}

impl Feasibility {
    pub fn is_feasible(&self) -> bool {
        matches!(self, Self::Feasible)
    }

    pub fn into_result(self) -> Result<(), ScheduleError> {
        match self {
            Self::Feasible => Ok(()),
            Self::Infeasible {
                task_id,
                task_name,
                shortfall_minutes,
            } => Err(ScheduleError::Infeasible {
                task_id,
                task_name,
                shortfall_minutes,
            }),
        }
    }
}

pub fn check_feasible(
    tasks: &[&Block],
    fixed_blocks: &[&Block],
    origin: DateTime<Utc>,
    policy: &CalendarPolicy,
) -> Feasibility {
    let mut due = tasks
        .iter()
        .filter_map(|task| task.deadline().map(|deadline| (deadline, *task)))
        .collect::<Vec<_>>();
    due.sort_by_key(|(deadline, _)| *deadline);

    let busy = merge_slots(fixed_blocks.iter().filter_map(|block| block.slot()).collect());

    let mut required: i64 = 0;
    for (deadline, task) in due {
        required += i64::from(task.duration_minutes);
        let available = working_minutes(origin, deadline, &busy, policy, required);
        if required > available {
            return Feasibility::Infeasible {
                task_id: task.id.clone(),
                task_name: task.name.clone(),
                shortfall_minutes: required - available,
            };
        }
    }
    Feasibility::Feasible
}

/// Working minutes in `[origin, deadline)` not claimed by `busy`, which must be merged.
pub fn available_minutes(
    origin: DateTime<Utc>,
    deadline: DateTime<Utc>,
    busy: &[TimeSlot],
    policy: &CalendarPolicy,
) -> i64 {
    working_minutes(origin, deadline, busy, policy, i64::MAX)
}

/// Same count, but the day walk stops once `enough` minutes are found.
fn working_minutes(
    origin: DateTime<Utc>,
    deadline: DateTime<Utc>,
    busy: &[TimeSlot],
    policy: &CalendarPolicy,
    enough: i64,
) -> i64 {
    if deadline <= origin {
        return 0;
    }
    let horizon = TimeSlot::new(origin, deadline);
    let last = policy.local_date(deadline);
    let mut date = policy.local_date(origin);
    let mut total = 0;

    while date <= last && total < enough {
        if let Some(window) = policy.day_slot(date).clip(&horizon) {
            let claimed = busy
                .iter()
                .filter_map(|slot| slot.clip(&window))
                .map(|slot| slot.minutes())
                .sum::<i64>();
            total += window.minutes() - claimed;
        }
        let Some(next) = date.succ_opt() else {
            break;
        };
        date = next;
    }
    total
}

pub(crate) fn merge_slots(mut slots: Vec<TimeSlot>) -> Vec<TimeSlot> {
    slots.retain(|slot| slot.end > slot.start);
    slots.sort_unstable_by(|left, right| left.start.cmp(&right.start));

    let mut merged: Vec<TimeSlot> = Vec::with_capacity(slots.len());
    for slot in slots {
        match merged.last_mut() {
            Some(last) if slot.start <= last.end => {
                if slot.end > last.end {
                    last.end = slot.end;
                }
            }
            _ => merged.push(slot),
        }
    }
    merged
}
