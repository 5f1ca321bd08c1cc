use crate::domain::models::{validate_non_empty, Block, Priority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Task,
    FixedEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockTemplate {
    pub name: String,
    pub kind: TemplateKind,
    pub duration_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colour: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval_days: Option<u32>,
}

impl BlockTemplate {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.name, "template.name")?;
        if self.duration_minutes == 0 {
            return Err("template.duration_minutes must be > 0".to_string());
        }
        if self.repeat_interval_days == Some(0) {
            return Err("template.repeat_interval_days must be > 0".to_string());
        }
        Ok(())
    }
}

/// Per-instance values; anything left `None` comes from the template.
#[derive(Debug, Clone, Default)]
pub struct TemplateOverrides {
    pub name: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub duration_minutes: Option<u32>,
    pub deadline: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateBook {
    templates: Vec<BlockTemplate>,
}

impl TemplateBook {
    pub fn new(templates: Vec<BlockTemplate>) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &[BlockTemplate] {
        &self.templates
    }

    pub fn add(&mut self, template: BlockTemplate) -> Result<(), String> {
        template.validate()?;
        if self.find(&template.name).is_some() {
            return Err(format!("template already exists: {}", template.name.trim()));
        }
        self.templates.push(template);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.templates.len();
        self.templates
            .retain(|template| !template.name.trim().eq_ignore_ascii_case(name.trim()));
        self.templates.len() != before
    }

    pub fn instantiate(&self, name: &str, overrides: TemplateOverrides) -> Result<Block, String> {
        let template = self
            .find(name)
            .ok_or_else(|| format!("template not found: {}", name.trim()))?;
        let block_name = overrides
            .name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(template.name.as_str())
            .to_string();
        let duration_minutes = overrides
            .duration_minutes
            .unwrap_or(template.duration_minutes);

        let mut block = match template.kind {
            TemplateKind::Task => {
                let mut block = Block::task(block_name, duration_minutes, overrides.deadline);
                block.start = overrides.start;
                block
            }
            TemplateKind::FixedEvent => {
                let start = overrides
                    .start
                    .ok_or_else(|| "fixed event template needs a start".to_string())?;
                let mut block = Block::fixed_event(block_name, start, duration_minutes)
                    .with_priority(template.priority);
                if let Some(days) = template.repeat_interval_days {
                    block = block.repeating_every(days);
                }
                block
            }
        };
        block.location = overrides.location.or_else(|| template.location.clone());
        block.notes = overrides.notes.or_else(|| template.notes.clone());
        block.colour = template.colour.clone();
        block.validate()?;
        Ok(block)
    }

    fn find(&self, name: &str) -> Option<&BlockTemplate> {
        self.templates
            .iter()
            .find(|template| template.name.trim().eq_ignore_ascii_case(name.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_book() -> TemplateBook {
        let mut book = TemplateBook::default();
        book.add(BlockTemplate {
            name: "Study Session".to_string(),
            kind: TemplateKind::Task,
            duration_minutes: 45,
            location: Some("Library".to_string()),
            notes: None,
            colour: Some("#3366ff".to_string()),
            priority: Priority::Low,
            repeat_interval_days: None,
        })
        .expect("add task template");
        book.add(BlockTemplate {
            name: "Gym".to_string(),
            kind: TemplateKind::FixedEvent,
            duration_minutes: 60,
            location: None,
            notes: None,
            colour: None,
            priority: Priority::Medium,
            repeat_interval_days: Some(2),
        })
        .expect("add event template");
        book
    }

    #[test]
    fn add_rejects_duplicates_and_invalid_templates() {
        let mut book = sample_book();
        let mut duplicate = book.templates()[0].clone();
        duplicate.name = "study session".to_string();
        assert!(book.add(duplicate).is_err());

        let mut invalid = book.templates()[0].clone();
        invalid.name = "Other".to_string();
        invalid.duration_minutes = 0;
        assert!(book.add(invalid).is_err());
    }

    #[test]
    fn instantiate_task_merges_overrides() {
        let book = sample_book();
        let deadline = fixed_time("2026-02-17T18:00:00Z");
        let block = book
            .instantiate(
                "Study Session",
                TemplateOverrides {
                    name: Some("Study Physics".to_string()),
                    deadline: Some(deadline),
                    ..TemplateOverrides::default()
                },
            )
            .expect("instantiate task");

        assert_eq!(block.name, "Study Physics");
        assert_eq!(block.duration_minutes, 45);
        assert_eq!(block.deadline(), Some(deadline));
        assert_eq!(block.location.as_deref(), Some("Library"));
        assert_eq!(block.start, None);
        assert!(block.is_movable_task());
    }

    #[test]
    fn instantiate_event_requires_start() {
        let book = sample_book();
        assert!(book
            .instantiate("Gym", TemplateOverrides::default())
            .is_err());

        let start = fixed_time("2026-02-16T16:00:00Z");
        let block = book
            .instantiate(
                "gym",
                TemplateOverrides {
                    start: Some(start),
                    ..TemplateOverrides::default()
                },
            )
            .expect("instantiate event");
        let event = block.as_fixed_event().expect("fixed event");
        assert_eq!(event.repeat_interval_days, Some(2));
        assert_eq!(event.priority, Priority::Medium);
        assert_eq!(block.start, Some(start));
    }

    #[test]
    fn remove_is_case_insensitive() {
        let mut book = sample_book();
        assert!(book.remove("GYM"));
        assert!(!book.remove("Gym"));
        assert_eq!(book.templates().len(), 1);
    }
}
