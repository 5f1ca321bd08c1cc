use crate::domain::models::{Block, Completion};
use crate::domain::policy::CalendarPolicy;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockStore {
    blocks: HashMap<String, Block>,
    order: Vec<String>,
}

impl BlockStore {
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        let mut store = Self::default();
        for block in blocks {
            store.insert(block);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Block> {
        self.blocks.get(id.trim())
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Block> {
        self.blocks.get_mut(id.trim())
    }

    /// Replacing an existing id keeps its position in insertion order.
    pub fn insert(&mut self, mut block: Block) -> Option<Block> {
        let id = block.id.trim().to_string();
        block.id.clone_from(&id);
        let previous = self.blocks.insert(id.clone(), block);
        if previous.is_none() {
            self.order.push(id);
        }
        previous
    }

    pub fn remove(&mut self, id: &str) -> Option<Block> {
        let id = id.trim();
        let removed = self.blocks.remove(id)?;
        self.order.retain(|candidate| candidate != id);
        Some(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Block> + '_ {
        self.order.iter().filter_map(|id| self.blocks.get(id))
    }

    pub fn blocks(&self) -> Vec<Block> {
        self.iter().cloned().collect()
    }

    pub fn replace_all(&mut self, blocks: Vec<Block>) {
        *self = Self::from_blocks(blocks);
    }

    /// Returns `None` when the id is absent or does not name a user task.
    pub fn set_completed(&mut self, id: &str, at: DateTime<Utc>) -> Option<bool> {
        let task = self.get_mut(id)?.as_task_mut()?;
        if task.generated.is_some() {
            return None;
        }
        if matches!(task.completion, Completion::Completed { .. }) {
            return Some(false);
        }
        task.completion = Completion::Completed { at };
        Some(true)
    }

    pub fn set_pending(&mut self, id: &str) -> Option<bool> {
        let task = self.get_mut(id)?.as_task_mut()?;
        if task.generated.is_some() {
            return None;
        }
        if task.completion == Completion::Pending {
            return Some(false);
        }
        task.completion = Completion::Pending;
        Some(true)
    }

    pub fn to_do_list(&self) -> Vec<Block> {
        self.iter()
            .filter(|block| block.as_task().is_some() && !block.is_generated())
            .cloned()
            .collect()
    }

    pub fn persistable(&self) -> Vec<Block> {
        self.iter()
            .filter(|block| !block.is_generated() && !block.is_virtual_occurrence())
            .cloned()
            .collect()
    }

    pub fn day(&self, date: NaiveDate, policy: &CalendarPolicy) -> Vec<Block> {
        self.dates(date, 1, policy)
    }

    pub fn week(&self, date: NaiveDate, policy: &CalendarPolicy) -> Vec<Block> {
        self.dates(monday_on_or_before(date), 7, policy)
    }

    /// Whole weeks from the Monday on or before the 1st until the month's last day.
    pub fn month(&self, date: NaiveDate, policy: &CalendarPolicy) -> Vec<Block> {
        let first = date.with_day(1).unwrap_or(date);
        let last = first
            .checked_add_months(Months::new(1))
            .and_then(|next| next.pred_opt())
            .unwrap_or(first);
        let grid_start = monday_on_or_before(first);
        let covered_days = (last - grid_start).num_days() + 1;
        let weeks = (covered_days + 6) / 7;
        self.dates(grid_start, weeks * 7, policy)
    }

    fn dates(&self, first: NaiveDate, days: i64, policy: &CalendarPolicy) -> Vec<Block> {
        let last = first + Duration::days(days);
        let mut blocks = self
            .iter()
            .filter(|block| {
                block.start.is_some_and(|start| {
                    let local = policy.local_date(start);
                    local >= first && local < last
                })
            })
            .cloned()
            .collect::<Vec<_>>();
        blocks.sort_by(|left, right| left.start.cmp(&right.start));
        blocks
    }
}

pub fn monday_on_or_before(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Generated;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").expect("valid date")
    }

    fn sample_store() -> BlockStore {
        BlockStore::from_blocks(vec![
            Block::task("Essay", 60, None)
                .with_id("tsk-essay")
                .with_start(fixed_time("2026-02-16T14:00:00Z")),
            Block::fixed_event("Lecture", fixed_time("2026-02-16T10:00:00Z"), 120)
                .with_id("evt-lecture"),
            Block::task("Unplaced", 30, None).with_id("tsk-unplaced"),
            Block::fixed_event("Gym", fixed_time("2026-02-19T16:00:00Z"), 60).with_id("evt-gym"),
            Block::fixed_event("Concert", fixed_time("2026-03-01T19:00:00Z"), 120)
                .with_id("evt-concert"),
            Block::generated(
                "meal:lunch:2026-02-16".to_string(),
                "Lunch",
                fixed_time("2026-02-16T12:00:00Z"),
                30,
                Generated::Meal("Lunch".to_string()),
            ),
        ])
    }

    #[test]
    fn day_query_orders_by_start_and_skips_unplaced() {
        let store = sample_store();
        let policy = CalendarPolicy::default();
        let names = store
            .day(date("2026-02-16"), &policy)
            .into_iter()
            .map(|block| block.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["Lecture", "Lunch", "Essay"]);
    }

    #[test]
    fn week_query_normalizes_to_monday() {
        let store = sample_store();
        let policy = CalendarPolicy::default();
        let week = store.week(date("2026-02-18"), &policy);
        assert_eq!(week.len(), 4);
        assert!(week.iter().all(|block| block.id != "evt-concert"));
    }

    #[test]
    fn month_query_covers_leading_and_trailing_weeks() {
        let store = sample_store();
        let policy = CalendarPolicy::default();
        // February 2026 starts on a Sunday, so the grid begins on 2026-01-26
        // and ends on 2026-03-01.
        let month = store.month(date("2026-02-10"), &policy);
        assert_eq!(month.len(), 5);
        assert!(month.iter().any(|block| block.id == "evt-concert"));
    }

    #[test]
    fn to_do_list_excludes_generated_and_events() {
        let store = sample_store();
        let ids = store
            .to_do_list()
            .into_iter()
            .map(|block| block.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["tsk-essay", "tsk-unplaced"]);
        assert_eq!(store.persistable().len(), 5);
    }

    #[test]
    fn completion_toggles_report_changes() {
        let mut store = sample_store();
        let at = fixed_time("2026-02-16T15:00:00Z");
        assert_eq!(store.set_completed("tsk-essay", at), Some(true));
        assert_eq!(store.set_completed("tsk-essay", at), Some(false));
        assert_eq!(store.set_completed("evt-lecture", at), None);
        assert_eq!(store.set_completed("meal:lunch:2026-02-16", at), None);
        assert_eq!(store.set_completed("missing", at), None);
        assert_eq!(store.set_pending("tsk-essay"), Some(true));
        assert_eq!(store.set_pending("tsk-essay"), Some(false));
    }

    #[test]
    fn insert_replaces_in_place_and_remove_drops_order() {
        let mut store = sample_store();
        let replaced = store.insert(Block::task("Essay v2", 90, None).with_id("tsk-essay"));
        assert!(replaced.is_some());
        assert_eq!(store.iter().next().map(|block| block.name.as_str()), Some("Essay v2"));

        assert!(store.remove("tsk-essay").is_some());
        assert!(store.remove("tsk-essay").is_none());
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn ids_are_stored_trimmed() {
        let mut store = BlockStore::default();
        store.insert(Block::task("Essay", 60, None).with_id(" essay "));
        assert_eq!(store.get("essay").map(|block| block.id.as_str()), Some("essay"));
        assert_eq!(store.get(" essay ").map(|block| block.id.as_str()), Some("essay"));
        assert!(store.remove(" essay ").is_some());
        assert!(store.is_empty());
    }
}
