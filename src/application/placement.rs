use crate::application::feasibility::check_feasible;
use crate::domain::error::ScheduleError;
use crate::domain::models::{
    ceil_to_slot, Block, BlockKind, FixedEvent, Generated, TimeSlot, SLOT_MINUTES,
};
use crate::domain::policy::CalendarPolicy;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

pub const RECURRENCE_HORIZON_DAYS: i64 = 42;
pub const MAX_DAY_ADVANCES: u32 = 366;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementOutcome {
    pub blocks: Vec<Block>,
    pub placed_tasks: usize,
    pub occurrences: usize,
    pub meals: usize,
    pub breaks: usize,
}

/// Busy time as disjoint, merged intervals keyed by start.
#[derive(Debug, Clone, Default)]
struct Occupancy {
    slots: BTreeMap<DateTime<Utc>, DateTime<Utc>>,
}

impl Occupancy {
    fn insert(&mut self, slot: TimeSlot) {
        if slot.end <= slot.start {
            return;
        }
        let mut start = slot.start;
        let mut end = slot.end;

        if let Some((&previous_start, &previous_end)) = self.slots.range(..=start).next_back() {
            if previous_end >= start {
                start = previous_start;
                end = end.max(previous_end);
                self.slots.remove(&previous_start);
            }
        }
        let swallowed = self
            .slots
            .range(start..=end)
            .map(|(key, value)| (*key, *value))
            .collect::<Vec<_>>();
        for (key, value) in swallowed {
            end = end.max(value);
            self.slots.remove(&key);
        }
        self.slots.insert(start, end);
    }

    /// End of the busy interval that overlaps `slot`, if any.
    fn conflict(&self, slot: &TimeSlot) -> Option<DateTime<Utc>> {
        let (_, &end) = self.slots.range(..slot.end).next_back()?;
        (end > slot.start).then_some(end)
    }
}

pub struct PlacementEngine<'a> {
    policy: &'a CalendarPolicy,
}

impl<'a> PlacementEngine<'a> {
    pub fn new(policy: &'a CalendarPolicy) -> Self {
        Self { policy }
    }

    /// Recomputes every placement from scratch. Nothing is mutated on error.
    pub fn schedule(
        &self,
        blocks: &[Block],
        origin: DateTime<Utc>,
        pinned: &HashSet<String>,
    ) -> Result<PlacementOutcome, ScheduleError> {
        self.policy.validate()?;
        let origin = ceil_to_slot(origin);
        let horizon_end = origin + Duration::days(RECURRENCE_HORIZON_DAYS);

        let mut anchored = Vec::new();
        let mut frozen = Vec::new();
        let mut movable = Vec::new();
        for block in blocks {
            if block.is_generated() || block.is_virtual_occurrence() {
                continue;
            }
            if block.is_completed() {
                frozen.push(block);
            } else if block.is_fixed() || (block.start.is_some() && pinned.contains(&block.id)) {
                anchored.push(block);
            } else {
                movable.push(block.clone());
            }
        }

        let occurrences = self.expand_occurrences(&anchored, origin, horizon_end);

        let claimed = anchored
            .iter()
            .copied()
            .chain(frozen.iter().copied())
            .chain(occurrences.iter())
            .collect::<Vec<_>>();
        let demand = movable.iter().collect::<Vec<_>>();
        if let Err(error) = check_feasible(&demand, &claimed, origin, self.policy).into_result() {
            warn!(error = %error, "placement rejected by feasibility check");
            return Err(error);
        }

        let mut occupancy = Occupancy::default();
        for slot in claimed.iter().filter_map(|block| block.slot()) {
            occupancy.insert(slot);
        }

        movable.sort_by_key(|block| (block.deadline().is_none(), block.deadline()));
        let mut pointer = origin;
        for task in &mut movable {
            let duration = task.duration();
            let start = self
                .find_slot(pointer, duration, &occupancy)
                .ok_or_else(|| ScheduleError::Unplaceable {
                    task_id: task.id.clone(),
                    task_name: task.name.clone(),
                })?;
            task.start = Some(start);
            occupancy.insert(TimeSlot::new(start, start + duration));
            pointer = start + duration;
        }

        let pinned_tasks = anchored
            .iter()
            .copied()
            .filter(|block| block.is_movable_task());
        audit_deadlines(movable.iter().chain(pinned_tasks))?;

        let placed_tasks = movable.len();
        let mut placed = movable
            .into_iter()
            .map(|block| (block.id.clone(), block))
            .collect::<HashMap<_, _>>();
        let mut result = Vec::with_capacity(blocks.len() + occurrences.len());
        for block in blocks {
            if block.is_generated() || block.is_virtual_occurrence() {
                continue;
            }
            result.push(placed.remove(&block.id).unwrap_or_else(|| block.clone()));
        }
        let occurrence_count = occurrences.len();
        result.extend(occurrences);

        let touched = self.touched_dates(&result, origin, horizon_end);
        let meals = self.decorate_meals(&result, &touched, &mut occupancy, origin);
        let meal_count = meals.len();
        result.extend(meals);
        let breaks = self.decorate_breaks(&result, &touched, &mut occupancy, origin);
        let break_count = breaks.len();
        result.extend(breaks);

        debug!(
            placed_tasks,
            occurrences = occurrence_count,
            meals = meal_count,
            breaks = break_count,
            origin = %origin,
            "placement_complete"
        );

        Ok(PlacementOutcome {
            blocks: result,
            placed_tasks,
            occurrences: occurrence_count,
            meals: meal_count,
            breaks: break_count,
        })
    }

    fn expand_occurrences(
        &self,
        anchored: &[&Block],
        origin: DateTime<Utc>,
        horizon_end: DateTime<Utc>,
    ) -> Vec<Block> {
        let window_start = self.policy.local_midnight(self.policy.local_date(origin));
        let mut seen = anchored
            .iter()
            .filter_map(|block| block.start.map(|start| (block.name.clone(), start)))
            .collect::<HashSet<_>>();
        let mut occurrences = Vec::new();

        for block in anchored {
            let Some(event) = block.as_fixed_event() else {
                continue;
            };
            let Some(interval) = event.repeat_interval_days.filter(|days| *days > 0) else {
                continue;
            };
            let Some(base) = block.start else {
                continue;
            };
            let interval = i64::from(interval);
            let base_local = base.with_timezone(&self.policy.timezone).naive_local();

            let mut step = 1;
            if base < window_start {
                step = ((window_start - base).num_days() / interval).max(1);
            }
            loop {
                let local = base_local + Duration::days(interval * step);
                let start = self.policy.at_local(local.date(), local.time());
                if start >= horizon_end {
                    break;
                }
                step += 1;
                if start < window_start || self.policy.is_holiday(local.date()) {
                    continue;
                }
                if !seen.insert((block.name.clone(), start)) {
                    continue;
                }
                let mut occurrence = (*block).clone();
                occurrence.id = format!("{}@{}", block.id, local.date());
                occurrence.start = Some(start);
                occurrence.kind = BlockKind::FixedEvent(FixedEvent {
                    occurrence_of: Some(block.id.clone()),
                    ..event.clone()
                });
                occurrences.push(occurrence);
            }
        }
        occurrences
    }

    fn find_slot(
        &self,
        from: DateTime<Utc>,
        duration: Duration,
        occupancy: &Occupancy,
    ) -> Option<DateTime<Utc>> {
        let mut pointer = from;
        let mut date = self.policy.local_date(pointer);
        let mut advances = 0;

        loop {
            date = date.max(self.policy.local_date(pointer));
            let (day_start, day_end) = self.policy.get_day_bounds(date);
            if pointer < day_start {
                pointer = day_start;
            }
            let candidate = TimeSlot::new(pointer, pointer + duration);
            if candidate.end > day_end {
                advances += 1;
                if advances > MAX_DAY_ADVANCES {
                    return None;
                }
                date = date.succ_opt()?;
                pointer = self.policy.get_day_bounds(date).0;
                continue;
            }
            match occupancy.conflict(&candidate) {
                Some(busy_until) => pointer = busy_until,
                None => return Some(pointer),
            }
        }
    }

    fn touched_dates(
        &self,
        blocks: &[Block],
        origin: DateTime<Utc>,
        horizon_end: DateTime<Utc>,
    ) -> BTreeSet<NaiveDate> {
        let first = self.policy.local_midnight(self.policy.local_date(origin));
        blocks
            .iter()
            .filter_map(|block| block.start)
            .filter(|start| *start >= first && *start < horizon_end)
            .map(|start| self.policy.local_date(start))
            .collect()
    }

    fn decorate_meals(
        &self,
        blocks: &[Block],
        dates: &BTreeSet<NaiveDate>,
        occupancy: &mut Occupancy,
        origin: DateTime<Utc>,
    ) -> Vec<Block> {
        let duration = self.policy.meal_duration();
        let step = Duration::minutes(SLOT_MINUTES);
        let mut meals = Vec::new();

        for date in dates {
            let day = self.policy.day_slot(*date);
            for meal in &self.policy.meal_windows {
                let already_planned = blocks.iter().any(|block| {
                    block.name.trim().eq_ignore_ascii_case(meal.name.trim())
                        && block
                            .start
                            .is_some_and(|start| self.policy.local_date(start) == *date)
                });
                if already_planned {
                    continue;
                }
                let Some(window) = self.policy.meal_slot(*date, meal).clip(&day) else {
                    continue;
                };

                let mut cursor = ceil_to_slot(window.start.max(origin));
                while cursor + duration <= window.end {
                    let candidate = TimeSlot::new(cursor, cursor + duration);
                    if occupancy.conflict(&candidate).is_none() {
                        occupancy.insert(candidate);
                        meals.push(Block::generated(
                            format!("meal:{}:{date}", meal.name.trim().to_ascii_lowercase()),
                            meal.name.trim(),
                            cursor,
                            self.policy.meal_duration_minutes,
                            Generated::Meal(meal.name.trim().to_string()),
                        ));
                        break;
                    }
                    cursor += step;
                }
            }
        }
        meals
    }

    fn decorate_breaks(
        &self,
        blocks: &[Block],
        dates: &BTreeSet<NaiveDate>,
        occupancy: &mut Occupancy,
        origin: DateTime<Utc>,
    ) -> Vec<Block> {
        let duration = self.policy.break_duration();
        let interval = i64::from(self.policy.break_interval_minutes);
        let mut breaks = Vec::new();

        for date in dates {
            let day = self.policy.day_slot(*date);
            let mut timeline = blocks
                .iter()
                .filter_map(|block| block.slot().map(|slot| (slot, block.is_rest())))
                .filter(|(slot, _)| self.policy.local_date(slot.start) == *date)
                .collect::<Vec<_>>();
            timeline.sort_by_key(|(slot, _)| slot.start);

            let mut worked = 0;
            for (slot, is_rest) in timeline {
                if is_rest {
                    worked = 0;
                    continue;
                }
                worked += slot.minutes();
                if worked < interval || slot.end < origin {
                    continue;
                }
                let candidate = TimeSlot::new(slot.end, slot.end + duration);
                if candidate.clip(&day) != Some(candidate)
                    || occupancy.conflict(&candidate).is_some()
                {
                    continue;
                }
                occupancy.insert(candidate);
                breaks.push(Block::generated(
                    format!("break:{}", candidate.start.to_rfc3339()),
                    "Break",
                    candidate.start,
                    self.policy.break_duration_minutes,
                    Generated::Break,
                ));
                worked = 0;
            }
        }
        breaks
    }
}

fn audit_deadlines<'b>(tasks: impl Iterator<Item = &'b Block>) -> Result<(), ScheduleError> {
    for task in tasks {
        let (Some(deadline), Some(end)) = (task.deadline(), task.end()) else {
            continue;
        };
        if end > deadline {
            let late_seconds = (end - deadline).num_seconds();
            return Err(ScheduleError::Infeasible {
                task_id: task.id.clone(),
                task_name: task.name.clone(),
                shortfall_minutes: (late_seconds + 59) / 60,
            });
        }
    }
    Ok(())
}
