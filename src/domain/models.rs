use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub const SLOT_MINUTES: i64 = 5;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn from_ordinal(value: i64) -> Self {
        match value {
            i64::MIN..=0 => Self::Low,
            1 => Self::Medium,
            _ => Self::High,
        }
    }

    pub fn ordinal(self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Completion {
    #[default]
    Pending,
    Completed { at: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Generated {
    Meal(String),
    Break,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FixedEvent {
    pub priority: Priority,
    pub repeat_interval_days: Option<u32>,
    /// Id of the series this block was expanded from; set only on virtual occurrences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occurrence_of: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TaskDetails {
    pub deadline: Option<DateTime<Utc>>,
    pub is_fixed: bool,
    pub completion: Completion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<Generated>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockKind {
    FixedEvent(FixedEvent),
    Task(TaskDetails),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub id: String,
    pub name: String,
    pub start: Option<DateTime<Utc>>,
    pub duration_minutes: u32,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub colour: Option<String>,
    pub kind: BlockKind,
}

impl Block {
    pub fn task(
        name: impl Into<String>,
        duration_minutes: u32,
        deadline: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: next_id("tsk"),
            name: name.into(),
            start: None,
            duration_minutes,
            location: None,
            notes: None,
            colour: None,
            kind: BlockKind::Task(TaskDetails {
                deadline,
                ..TaskDetails::default()
            }),
        }
    }

    pub fn fixed_event(
        name: impl Into<String>,
        start: DateTime<Utc>,
        duration_minutes: u32,
    ) -> Self {
        Self {
            id: next_id("evt"),
            name: name.into(),
            start: Some(start),
            duration_minutes,
            location: None,
            notes: None,
            colour: None,
            kind: BlockKind::FixedEvent(FixedEvent::default()),
        }
    }

    pub(crate) fn generated(
        id: String,
        name: &str,
        start: DateTime<Utc>,
        duration_minutes: u32,
        marker: Generated,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            start: Some(start),
            duration_minutes,
            location: None,
            notes: None,
            colour: None,
            kind: BlockKind::Task(TaskDetails {
                generated: Some(marker),
                ..TaskDetails::default()
            }),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        if let BlockKind::FixedEvent(event) = &mut self.kind {
            event.priority = priority;
        }
        self
    }

    pub fn repeating_every(mut self, days: u32) -> Self {
        if let BlockKind::FixedEvent(event) = &mut self.kind {
            event.repeat_interval_days = Some(days);
        }
        self
    }

    pub fn pinned_in_place(mut self) -> Self {
        if let BlockKind::Task(task) = &mut self.kind {
            task.is_fixed = true;
        }
        self
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.start.map(|start| start + self.duration())
    }

    pub fn slot(&self) -> Option<TimeSlot> {
        let start = self.start?;
        Some(TimeSlot {
            start,
            end: start + self.duration(),
        })
    }

    pub fn is_fixed(&self) -> bool {
        match &self.kind {
            BlockKind::FixedEvent(_) => true,
            BlockKind::Task(task) => task.is_fixed,
        }
    }

    pub fn as_task(&self) -> Option<&TaskDetails> {
        match &self.kind {
            BlockKind::Task(task) => Some(task),
            BlockKind::FixedEvent(_) => None,
        }
    }

    pub fn as_task_mut(&mut self) -> Option<&mut TaskDetails> {
        match &mut self.kind {
            BlockKind::Task(task) => Some(task),
            BlockKind::FixedEvent(_) => None,
        }
    }

    pub fn as_fixed_event(&self) -> Option<&FixedEvent> {
        match &self.kind {
            BlockKind::FixedEvent(event) => Some(event),
            BlockKind::Task(_) => None,
        }
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.as_task().and_then(|task| task.deadline)
    }

    pub fn is_completed(&self) -> bool {
        matches!(
            self.as_task().map(|task| &task.completion),
            Some(Completion::Completed { .. })
        )
    }

    pub fn is_generated(&self) -> bool {
        self.as_task().is_some_and(|task| task.generated.is_some())
    }

    pub fn is_rest(&self) -> bool {
        self.is_generated() || self.is_meal_named()
    }

    pub fn is_virtual_occurrence(&self) -> bool {
        self.as_fixed_event()
            .is_some_and(|event| event.occurrence_of.is_some())
    }

    /// User tasks are the ones the engine may move: pending, not generated, not fixed.
    pub fn is_movable_task(&self) -> bool {
        match &self.kind {
            BlockKind::Task(task) => {
                !task.is_fixed
                    && task.generated.is_none()
                    && task.completion == Completion::Pending
            }
            BlockKind::FixedEvent(_) => false,
        }
    }

    fn is_meal_named(&self) -> bool {
        matches!(
            self.name.trim().to_ascii_lowercase().as_str(),
            "breakfast" | "lunch" | "dinner" | "break"
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "block.id")?;
        validate_non_empty(&self.name, "block.name")?;
        if self.duration_minutes == 0 {
            return Err("block.duration_minutes must be > 0".to_string());
        }
        match &self.kind {
            BlockKind::FixedEvent(event) => {
                if self.start.is_none() {
                    return Err("fixed event must have a start".to_string());
                }
                if event.repeat_interval_days == Some(0) {
                    return Err("fixed_event.repeat_interval_days must be > 0".to_string());
                }
            }
            BlockKind::Task(task) => {
                if task.is_fixed && self.start.is_none() {
                    return Err("fixed task must have a start".to_string());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn minutes(&self) -> i64 {
        if self.end <= self.start {
            return 0;
        }
        (self.end - self.start).num_minutes()
    }

    pub fn clip(&self, window: &TimeSlot) -> Option<TimeSlot> {
        let start = self.start.max(window.start);
        let end = self.end.min(window.end);
        (end > start).then_some(TimeSlot { start, end })
    }
}

/// Rounds to the nearest 5-minute mark, halves rounding up.
pub fn snap_to_five_minutes(time: DateTime<Utc>) -> DateTime<Utc> {
    let slot_seconds = SLOT_MINUTES * 60;
    let seconds = time.timestamp();
    let remainder = seconds.rem_euclid(slot_seconds);
    let base = seconds - remainder;
    let snapped = if remainder * 2 >= slot_seconds {
        base + slot_seconds
    } else {
        base
    };
    DateTime::from_timestamp(snapped, 0).unwrap_or(time)
}

pub fn ceil_to_slot(time: DateTime<Utc>) -> DateTime<Utc> {
    let slot_seconds = SLOT_MINUTES * 60;
    let seconds = time.timestamp();
    let remainder = seconds.rem_euclid(slot_seconds);
    if remainder == 0 && time.timestamp_subsec_nanos() == 0 {
        return time;
    }
    DateTime::from_timestamp(seconds - remainder + slot_seconds, 0).unwrap_or(time)
}

pub(crate) fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_task() -> Block {
        Block::task("Essay", 60, Some(fixed_time("2026-02-16T13:00:00Z")))
            .with_id("tsk-1")
            .with_notes("chapter two")
    }

    fn sample_event() -> Block {
        Block::fixed_event("Lecture", fixed_time("2026-02-16T10:00:00Z"), 120)
            .with_id("evt-1")
            .with_location("Room 101")
            .with_priority(Priority::Medium)
            .repeating_every(7)
    }

    #[test]
    fn block_validate_accepts_valid_blocks() {
        assert!(sample_task().validate().is_ok());
        assert!(sample_event().validate().is_ok());
    }

    #[test]
    fn block_validate_rejects_zero_duration_and_blank_name() {
        let mut task = sample_task();
        task.duration_minutes = 0;
        assert!(task.validate().is_err());

        let mut event = sample_event();
        event.name = "   ".to_string();
        assert!(event.validate().is_err());
    }

    #[test]
    fn fixed_event_requires_start_and_positive_interval() {
        let mut event = sample_event();
        event.start = None;
        assert!(event.validate().is_err());

        let event = sample_event().repeating_every(0);
        assert!(event.validate().is_err());
    }

    #[test]
    fn task_classification_follows_kind() {
        let task = sample_task();
        assert!(task.is_movable_task());
        assert!(!task.is_fixed());
        assert!(!task.is_completed());

        let event = sample_event();
        assert!(event.is_fixed());
        assert!(!event.is_movable_task());
        assert_eq!(event.deadline(), None);

        let pinned = sample_task().pinned_in_place();
        assert!(pinned.is_fixed());
        assert!(!pinned.is_movable_task());

        let lunch = Block::generated(
            "meal:lunch".to_string(),
            "Lunch",
            fixed_time("2026-02-16T12:00:00Z"),
            30,
            Generated::Meal("Lunch".to_string()),
        );
        assert!(lunch.is_generated());
        assert!(lunch.is_rest());
        assert!(!lunch.is_movable_task());
    }

    #[test]
    fn slot_overlap_is_half_open() {
        let first = TimeSlot::new(
            fixed_time("2026-02-16T09:00:00Z"),
            fixed_time("2026-02-16T10:00:00Z"),
        );
        let touching = TimeSlot::new(
            fixed_time("2026-02-16T10:00:00Z"),
            fixed_time("2026-02-16T11:00:00Z"),
        );
        let inside = TimeSlot::new(
            fixed_time("2026-02-16T09:30:00Z"),
            fixed_time("2026-02-16T09:45:00Z"),
        );
        assert!(!first.overlaps(&touching));
        assert!(first.overlaps(&inside));
        assert_eq!(first.minutes(), 60);
        assert_eq!(
            touching.clip(&first),
            None,
            "touching slots share no minutes"
        );
    }

    #[test]
    fn snapping_rounds_to_five_minute_grid() {
        assert_eq!(
            snap_to_five_minutes(fixed_time("2026-02-16T09:02:00Z")),
            fixed_time("2026-02-16T09:00:00Z")
        );
        assert_eq!(
            snap_to_five_minutes(fixed_time("2026-02-16T09:02:30Z")),
            fixed_time("2026-02-16T09:05:00Z")
        );
        assert_eq!(
            ceil_to_slot(fixed_time("2026-02-16T09:00:01Z")),
            fixed_time("2026-02-16T09:05:00Z")
        );
        assert_eq!(
            ceil_to_slot(fixed_time("2026-02-16T09:10:00Z")),
            fixed_time("2026-02-16T09:10:00Z")
        );
    }

    #[test]
    fn blocks_support_serde_roundtrip() {
        let mut task = sample_task();
        if let Some(details) = task.as_task_mut() {
            details.completion = Completion::Completed {
                at: fixed_time("2026-02-16T12:00:00Z"),
            };
        }
        let event = sample_event();

        let task_roundtrip: Block =
            serde_json::from_str(&serde_json::to_string(&task).expect("serialize task"))
                .expect("deserialize task");
        let event_roundtrip: Block =
            serde_json::from_str(&serde_json::to_string(&event).expect("serialize event"))
                .expect("deserialize event");

        assert_eq!(task_roundtrip, task);
        assert_eq!(event_roundtrip, event);
    }
}
