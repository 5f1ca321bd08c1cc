use crate::application::bootstrap::bootstrap_workspace;
use crate::application::error::PlannerError;
use crate::application::placement::PlacementEngine;
use crate::application::store::BlockStore;
use crate::domain::models::{
    snap_to_five_minutes, Block, BlockKind, Completion, Priority, TimeSlot,
};
use crate::domain::policy::CalendarPolicy;
use crate::domain::templates::{BlockTemplate, TemplateBook, TemplateOverrides};
use crate::infrastructure::block_mapper;
use crate::infrastructure::block_repository::{
    BlockRepository, InMemoryBlockRepository, SqliteBlockRepository,
};
use crate::infrastructure::config::{load_policy, load_templates, save_policy, save_templates};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::{info, warn};

pub const MIN_RESIZE_MINUTES: i64 = 15;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Start,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearSpan {
    RestOfDay,
    Minutes(u32),
}

/// Field changes for `edit_block`; `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockEdit {
    pub name: Option<String>,
    pub duration_minutes: Option<u32>,
    pub deadline: Option<Option<DateTime<Utc>>>,
    pub location: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub colour: Option<Option<String>>,
    pub priority: Option<Priority>,
    pub repeat_interval_days: Option<Option<u32>>,
}

impl BlockEdit {
    fn apply_to(self, block: &mut Block) -> Result<(), String> {
        if let Some(name) = self.name {
            block.name = name.trim().to_string();
        }
        if let Some(minutes) = self.duration_minutes {
            block.duration_minutes = minutes;
        }
        if let Some(location) = self.location {
            block.location = location;
        }
        if let Some(notes) = self.notes {
            block.notes = notes;
        }
        if let Some(colour) = self.colour {
            block.colour = colour;
        }
        match &mut block.kind {
            BlockKind::Task(task) => {
                if self.priority.is_some() || self.repeat_interval_days.is_some() {
                    return Err("priority and repetition apply to fixed events only".to_string());
                }
                if let Some(deadline) = self.deadline {
                    task.deadline = deadline;
                }
            }
            BlockKind::FixedEvent(event) => {
                if self.deadline.is_some() {
                    return Err("deadlines apply to tasks only".to_string());
                }
                if let Some(priority) = self.priority {
                    event.priority = priority;
                }
                if let Some(days) = self.repeat_interval_days {
                    event.repeat_interval_days = days;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct RuntimeState {
    store: BlockStore,
    policy: CalendarPolicy,
    templates: TemplateBook,
    cleared_until: Option<DateTime<Utc>>,
    placement_runs: u64,
}

impl RuntimeState {
    fn origin(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.cleared_until {
            Some(until) if until > now => until,
            _ => {
                self.cleared_until = None;
                now
            }
        }
    }
}

enum Step<T> {
    Reflow(T, HashSet<String>),
    Skip(T),
}

pub struct Planner<R: BlockRepository> {
    repository: R,
    config_dir: Option<PathBuf>,
    logs_dir: Option<PathBuf>,
    runtime: Mutex<RuntimeState>,
    log_guard: Mutex<()>,
    now_provider: NowProvider,
}

impl Planner<InMemoryBlockRepository> {
    pub fn in_memory(policy: CalendarPolicy) -> Result<Self, PlannerError> {
        Self::new(InMemoryBlockRepository::default(), policy)
    }
}

impl Planner<SqliteBlockRepository> {
    /// Opens (creating if needed) a workspace with config, state and logs.
    pub fn open(workspace_root: &Path) -> Result<Self, PlannerError> {
        let bootstrap = bootstrap_workspace(workspace_root)?;
        let policy = load_policy(&bootstrap.config_dir)?;
        let templates = load_templates(&bootstrap.config_dir)?;
        let repository = SqliteBlockRepository::new(&bootstrap.database_path);
        let store = BlockStore::from_blocks(repository.load_all()?);

        Ok(Self {
            repository,
            config_dir: Some(bootstrap.config_dir),
            logs_dir: Some(bootstrap.logs_dir),
            runtime: Mutex::new(RuntimeState {
                store,
                policy,
                templates,
                ..RuntimeState::default()
            }),
            log_guard: Mutex::new(()),
            now_provider: Arc::new(Utc::now),
        })
    }
}

impl<R: BlockRepository> Planner<R> {
    pub fn new(repository: R, policy: CalendarPolicy) -> Result<Self, PlannerError> {
        let store = BlockStore::from_blocks(repository.load_all()?);
        Ok(Self {
            repository,
            config_dir: None,
            logs_dir: None,
            runtime: Mutex::new(RuntimeState {
                store,
                policy,
                ..RuntimeState::default()
            }),
            log_guard: Mutex::new(()),
            now_provider: Arc::new(Utc::now),
        })
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn log_info(&self, command: &str, message: &str) {
        info!(command, message, "planner command");
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        warn!(command, message, "planner command failed");
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Some(logs_dir) = &self.logs_dir else {
            return;
        };
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    /// Inserts a block and reflows the schedule around it.
    pub fn add_block(&self, block: Block) -> Result<Block, PlannerError> {
        check_user_block(&block)?;
        let id = block.id.clone();
        self.apply("add_block", move |runtime, _| {
            if runtime.store.get(&block.id).is_some() {
                return Err(PlannerError::InvalidInput(format!(
                    "block already exists: {}",
                    block.id
                )));
            }
            runtime.store.insert(block);
            Ok(Step::Reflow((), HashSet::new()))
        })?;
        self.placed(&id)
    }

    /// Buffers a block without placing it; it is placed and saved by the next reflow.
    pub fn stage_block(&self, block: Block) -> Result<(), PlannerError> {
        check_user_block(&block)?;
        let id = block.id.clone();
        {
            let mut runtime = self.lock_runtime()?;
            if runtime.store.get(&id).is_some() {
                return Err(PlannerError::InvalidInput(format!(
                    "block already exists: {id}"
                )));
            }
            runtime.store.insert(block);
        }
        self.log_info("stage_block", &format!("staged block_id={id}"));
        Ok(())
    }

    pub fn reschedule(&self) -> Result<(), PlannerError> {
        self.apply("reschedule", |_, _| Ok(Step::Reflow((), HashSet::new())))
    }

    /// Returns `false` when no block has that id.
    pub fn remove_block(&self, id: &str) -> Result<bool, PlannerError> {
        self.apply("remove_block", |runtime, _| {
            let Some(block) = runtime.store.get(id) else {
                return Ok(Step::Skip(false));
            };
            ensure_user_owned(block)?;
            runtime.store.remove(id);
            Ok(Step::Reflow(true, HashSet::new()))
        })
    }

    pub fn mark_complete(&self, id: &str) -> Result<bool, PlannerError> {
        self.apply("mark_complete", |runtime, now| {
            let Some(block) = runtime.store.get(id) else {
                return Ok(Step::Skip(false));
            };
            ensure_user_owned(block)?;
            if block.as_task().is_none() {
                return Err(PlannerError::InvalidInput(
                    "only tasks can be completed".to_string(),
                ));
            }
            match runtime.store.set_completed(id, now) {
                Some(true) => Ok(Step::Reflow(true, HashSet::new())),
                _ => Ok(Step::Skip(false)),
            }
        })
    }

    pub fn mark_incomplete(&self, id: &str) -> Result<bool, PlannerError> {
        self.apply("mark_incomplete", |runtime, _| {
            let Some(block) = runtime.store.get(id) else {
                return Ok(Step::Skip(false));
            };
            ensure_user_owned(block)?;
            match runtime.store.set_pending(id) {
                Some(true) => Ok(Step::Reflow(true, HashSet::new())),
                _ => Ok(Step::Skip(false)),
            }
        })
    }

    /// Drag: a task is pinned at the snapped start for this run only; a fixed block just moves.
    pub fn move_block(&self, id: &str, new_start: DateTime<Utc>) -> Result<Block, PlannerError> {
        let id = id.trim().to_string();
        self.apply("move_block", |runtime, now| {
            let block = editable(&mut runtime.store, &id)?;
            let start = snap_to_five_minutes(new_start);
            if start < drag_floor(block, now) {
                return Err(PlannerError::InvalidInput(if in_progress(block, now) {
                    "a block in progress can only move later".to_string()
                } else {
                    "blocks cannot be moved into the past".to_string()
                }));
            }
            block.start = Some(start);
            Ok(Step::Reflow((), pin_if_task(block)))
        })?;
        self.placed(&id)
    }

    pub fn resize_block(
        &self,
        id: &str,
        edge: Edge,
        boundary: DateTime<Utc>,
    ) -> Result<Block, PlannerError> {
        let id = id.trim().to_string();
        self.apply("resize_block", |runtime, now| {
            let mut fixed = runtime
                .store
                .iter()
                .filter(|block| block.is_fixed() && block.id != id)
                .filter_map(Block::slot)
                .collect::<Vec<_>>();
            fixed.sort_by_key(|slot| slot.start);

            let block = editable(&mut runtime.store, &id)?;
            let Some(slot) = block.slot() else {
                return Err(PlannerError::InvalidInput(
                    "only placed blocks can be resized".to_string(),
                ));
            };
            let boundary = snap_to_five_minutes(boundary);
            let minimum = Duration::minutes(MIN_RESIZE_MINUTES);

            let (start, end) = match edge {
                Edge::Start => {
                    let floor = drag_floor(block, now);
                    let mut start = boundary.max(floor);
                    for busy in &fixed {
                        if busy.start < slot.end && busy.end > start {
                            start = start.max(busy.end);
                        }
                    }
                    let start = start.min(slot.end - minimum);
                    let resized = TimeSlot::new(start, slot.end);
                    if start < floor || fixed.iter().any(|busy| busy.overlaps(&resized)) {
                        return Err(PlannerError::InvalidInput(format!(
                            "no room for a {MIN_RESIZE_MINUTES}-minute block ending at {}",
                            slot.end.to_rfc3339()
                        )));
                    }
                    (start, slot.end)
                }
                Edge::End => {
                    let end = fixed
                        .iter()
                        .find(|busy| busy.start >= slot.start && busy.start < boundary)
                        .map_or(boundary, |busy| busy.start);
                    (slot.start, end.max(slot.start + minimum))
                }
            };

            block.start = Some(start);
            block.duration_minutes = u32::try_from((end - start).num_minutes())
                .map_err(|_| PlannerError::InvalidInput("resized block is too long".to_string()))?;
            Ok(Step::Reflow((), pin_if_task(block)))
        })?;
        self.placed(&id)
    }

    /// Keeps the near future free; returns the instant placement resumes from.
    pub fn clear_for_duration(&self, span: ClearSpan) -> Result<DateTime<Utc>, PlannerError> {
        self.apply("clear_for_duration", move |runtime, now| {
            let policy = &runtime.policy;
            let until = match span {
                ClearSpan::RestOfDay => {
                    let tomorrow = policy.local_date(now).succ_opt().ok_or_else(|| {
                        PlannerError::InvalidInput("date out of range".to_string())
                    })?;
                    policy.get_day_bounds(tomorrow).0
                }
                ClearSpan::Minutes(minutes) => {
                    next_working_instant(policy, now + Duration::minutes(i64::from(minutes)))?
                }
            };
            runtime.cleared_until = Some(until);
            Ok(Step::Reflow(until, HashSet::new()))
        })
    }

    pub fn cancel_clear(&self) -> Result<(), PlannerError> {
        self.apply("cancel_clear", |runtime, _| {
            runtime.cleared_until = None;
            Ok(Step::Reflow((), HashSet::new()))
        })
    }

    pub fn edit_block(&self, id: &str, edit: BlockEdit) -> Result<Block, PlannerError> {
        let id = id.trim().to_string();
        self.apply("edit_block", |runtime, _| {
            let block = editable(&mut runtime.store, &id)?;
            edit.apply_to(block).map_err(PlannerError::InvalidInput)?;
            block.validate().map_err(PlannerError::InvalidInput)?;
            Ok(Step::Reflow((), HashSet::new()))
        })?;
        self.placed(&id)
    }

    pub fn update_policy(&self, policy: CalendarPolicy) -> Result<(), PlannerError> {
        policy.validate()?;
        self.apply("update_policy", move |runtime, _| {
            runtime.policy = policy;
            Ok(Step::Reflow((), HashSet::new()))
        })
    }

    pub fn add_holiday(&self, start: NaiveDate, end: NaiveDate) -> Result<(), PlannerError> {
        let mut policy = self.policy()?;
        policy.add_holiday(start, end)?;
        self.update_policy(policy)
    }

    /// Drops history older than `history_days` plus holidays that already ended.
    pub fn clean_old_blocks(&self) -> Result<usize, PlannerError> {
        self.apply("clean_old_blocks", |runtime, now| {
            let cutoff = now - Duration::days(i64::from(runtime.policy.history_days));
            let stale = runtime
                .store
                .iter()
                .filter(|block| is_stale(block, cutoff))
                .map(|block| block.id.clone())
                .collect::<Vec<_>>();
            for id in &stale {
                runtime.store.remove(id);
            }

            let holidays = runtime.policy.holidays.len();
            let today = runtime.policy.local_date(now);
            runtime.policy.clean_past_holidays(today);
            if stale.is_empty() && holidays == runtime.policy.holidays.len() {
                return Ok(Step::Skip(0));
            }
            Ok(Step::Reflow(stale.len(), HashSet::new()))
        })
    }

    pub fn add_template(&self, template: BlockTemplate) -> Result<(), PlannerError> {
        let name = template.name.trim().to_string();
        let book = {
            let mut runtime = self.lock_runtime()?;
            runtime
                .templates
                .add(template)
                .map_err(PlannerError::InvalidInput)?;
            runtime.templates.clone()
        };
        self.persist_templates(&book)?;
        self.log_info("add_template", &format!("added template name={name}"));
        Ok(())
    }

    pub fn remove_template(&self, name: &str) -> Result<bool, PlannerError> {
        let (removed, book) = {
            let mut runtime = self.lock_runtime()?;
            let removed = runtime.templates.remove(name);
            (removed, runtime.templates.clone())
        };
        if removed {
            self.persist_templates(&book)?;
            self.log_info("remove_template", &format!("removed template name={}", name.trim()));
        }
        Ok(removed)
    }

    pub fn templates(&self) -> Result<Vec<BlockTemplate>, PlannerError> {
        Ok(self.lock_runtime()?.templates.templates().to_vec())
    }

    pub fn add_from_template(
        &self,
        name: &str,
        overrides: TemplateOverrides,
    ) -> Result<Block, PlannerError> {
        let block = self
            .lock_runtime()?
            .templates
            .instantiate(name, overrides)
            .map_err(PlannerError::InvalidInput)?;
        self.add_block(block)
    }

    pub fn day(&self, date: NaiveDate) -> Result<Vec<Block>, PlannerError> {
        let runtime = self.lock_runtime()?;
        Ok(runtime.store.day(date, &runtime.policy))
    }

    pub fn week(&self, date: NaiveDate) -> Result<Vec<Block>, PlannerError> {
        let runtime = self.lock_runtime()?;
        Ok(runtime.store.week(date, &runtime.policy))
    }

    pub fn month(&self, date: NaiveDate) -> Result<Vec<Block>, PlannerError> {
        let runtime = self.lock_runtime()?;
        Ok(runtime.store.month(date, &runtime.policy))
    }

    pub fn to_do_list(&self) -> Result<Vec<Block>, PlannerError> {
        Ok(self.lock_runtime()?.store.to_do_list())
    }

    pub fn blocks(&self) -> Result<Vec<Block>, PlannerError> {
        Ok(self.lock_runtime()?.store.blocks())
    }

    pub fn get_block(&self, id: &str) -> Result<Option<Block>, PlannerError> {
        Ok(self.lock_runtime()?.store.get(id).cloned())
    }

    pub fn policy(&self) -> Result<CalendarPolicy, PlannerError> {
        Ok(self.lock_runtime()?.policy.clone())
    }

    pub fn placement_runs(&self) -> Result<u64, PlannerError> {
        Ok(self.lock_runtime()?.placement_runs)
    }

    pub fn cleared_until(&self) -> Result<Option<DateTime<Utc>>, PlannerError> {
        Ok(self.lock_runtime()?.cleared_until)
    }

    pub fn export_json(&self) -> Result<String, PlannerError> {
        let blocks = self.lock_runtime()?.store.persistable();
        Ok(block_mapper::export_json(&blocks)?)
    }

    /// Replaces every block with the document's contents and reflows.
    pub fn import_json(&self, raw: &str) -> Result<usize, PlannerError> {
        let blocks = block_mapper::import_json(raw)?;
        let count = blocks.len();
        self.apply("import_json", move |runtime, _| {
            runtime.store.replace_all(blocks);
            Ok(Step::Reflow(count, HashSet::new()))
        })
    }

    fn apply<T>(
        &self,
        command: &str,
        mutate: impl FnOnce(&mut RuntimeState, DateTime<Utc>) -> Result<Step<T>, PlannerError>,
    ) -> Result<T, PlannerError> {
        let started = Instant::now();
        let result = self.transact(mutate);
        match &result {
            Ok(_) => self.log_info(
                command,
                &format!("completed in {}ms", started.elapsed().as_millis()),
            ),
            Err(error) => self.log_error(command, &error.to_string()),
        }
        result
    }

    /// Mutates a copy of the runtime state and swaps it in only after placement and every
    /// save succeed. A changed policy is written before the blocks.
    fn transact<T>(
        &self,
        mutate: impl FnOnce(&mut RuntimeState, DateTime<Utc>) -> Result<Step<T>, PlannerError>,
    ) -> Result<T, PlannerError> {
        let now = (self.now_provider)();
        let mut runtime = self.lock_runtime()?;
        let mut candidate = (*runtime).clone();

        let (value, pinned) = match mutate(&mut candidate, now)? {
            Step::Skip(value) => return Ok(value),
            Step::Reflow(value, pinned) => (value, pinned),
        };

        let origin = candidate.origin(now);
        let outcome = PlacementEngine::new(&candidate.policy).schedule(
            &candidate.store.blocks(),
            origin,
            &pinned,
        )?;
        candidate.store.replace_all(outcome.blocks);
        candidate.placement_runs += 1;

        if candidate.policy != runtime.policy {
            self.persist_policy(&candidate.policy)?;
        }
        self.repository.replace_all(&candidate.store.persistable())?;
        *runtime = candidate;
        Ok(value)
    }

    fn placed(&self, id: &str) -> Result<Block, PlannerError> {
        self.get_block(id)?
            .ok_or_else(|| PlannerError::State(format!("block {id} missing after placement")))
    }

    fn persist_policy(&self, policy: &CalendarPolicy) -> Result<(), PlannerError> {
        if let Some(config_dir) = &self.config_dir {
            save_policy(config_dir, policy)?;
        }
        Ok(())
    }

    fn persist_templates(&self, book: &TemplateBook) -> Result<(), PlannerError> {
        if let Some(config_dir) = &self.config_dir {
            save_templates(config_dir, book)?;
        }
        Ok(())
    }

    fn lock_runtime(&self) -> Result<MutexGuard<'_, RuntimeState>, PlannerError> {
        self.runtime
            .lock()
            .map_err(|error| PlannerError::State(format!("runtime lock poisoned: {error}")))
    }
}

fn check_user_block(block: &Block) -> Result<(), PlannerError> {
    block.validate().map_err(PlannerError::InvalidInput)?;
    ensure_user_owned(block)
}

fn ensure_user_owned(block: &Block) -> Result<(), PlannerError> {
    if block.is_generated() {
        return Err(PlannerError::InvalidInput(format!(
            "'{}' is generated by the planner and cannot be changed",
            block.name
        )));
    }
    if block.is_virtual_occurrence() {
        return Err(PlannerError::InvalidInput(format!(
            "'{}' is an occurrence of a repeating event; change the series instead",
            block.name
        )));
    }
    Ok(())
}

fn editable<'s>(store: &'s mut BlockStore, id: &str) -> Result<&'s mut Block, PlannerError> {
    let block = store
        .get_mut(id)
        .ok_or_else(|| PlannerError::InvalidInput(format!("block not found: {id}")))?;
    ensure_user_owned(block)?;
    if block.is_completed() {
        return Err(PlannerError::InvalidInput(
            "completed tasks are frozen".to_string(),
        ));
    }
    Ok(block)
}

fn in_progress(block: &Block, now: DateTime<Utc>) -> bool {
    block
        .slot()
        .is_some_and(|slot| slot.start <= now && now < slot.end)
}

/// Earliest start a drag may choose.
fn drag_floor(block: &Block, now: DateTime<Utc>) -> DateTime<Utc> {
    match block.start {
        Some(start) if in_progress(block, now) => start,
        _ => snap_to_five_minutes(now),
    }
}

fn pin_if_task(block: &Block) -> HashSet<String> {
    let mut pinned = HashSet::new();
    if block.is_movable_task() {
        pinned.insert(block.id.clone());
    }
    pinned
}

fn next_working_instant(
    policy: &CalendarPolicy,
    instant: DateTime<Utc>,
) -> Result<DateTime<Utc>, PlannerError> {
    let date = policy.local_date(instant);
    let (day_start, day_end) = policy.get_day_bounds(date);
    if instant < day_start {
        return Ok(day_start);
    }
    if instant < day_end {
        return Ok(instant);
    }
    let tomorrow = date
        .succ_opt()
        .ok_or_else(|| PlannerError::InvalidInput("date out of range".to_string()))?;
    Ok(policy.get_day_bounds(tomorrow).0)
}

fn is_stale(block: &Block, cutoff: DateTime<Utc>) -> bool {
    match &block.kind {
        BlockKind::Task(task) => {
            task.generated.is_none()
                && matches!(&task.completion, Completion::Completed { at } if *at < cutoff)
        }
        BlockKind::FixedEvent(event) => {
            event.repeat_interval_days.is_none()
                && event.occurrence_of.is_none()
                && block.end().is_some_and(|end| end < cutoff)
        }
    }
}
