use crate::domain::models::{Block, BlockKind, Completion, FixedEvent, Priority, TaskDetails};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const TYPE_FIXED_EVENT: &str = "fixed_event";
const TYPE_TASK: &str = "task";
const DOCUMENT_SCHEMA: u64 = 1;

/// Flat row shape shared by the SQLite table and the JSON export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: String,
    pub name: String,
    #[serde(default)]
    pub start: Option<String>,
    pub duration_minutes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colour: Option<String>,
    #[serde(default)]
    pub is_fixed: bool,
    #[serde(default)]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BlockDocument {
    schema: u64,
    blocks: Vec<BlockRecord>,
}

pub fn encode_block(block: &Block) -> BlockRecord {
    let mut record = BlockRecord {
        id: block.id.clone(),
        block_type: TYPE_TASK.to_string(),
        name: block.name.clone(),
        start: block.start.map(|start| start.to_rfc3339()),
        duration_minutes: i64::from(block.duration_minutes),
        location: block.location.clone(),
        notes: block.notes.clone(),
        colour: block.colour.clone(),
        is_fixed: block.is_fixed(),
        priority: 0,
        repeat_interval_days: None,
        deadline: None,
        is_completed: false,
        completed_at: None,
    };
    match &block.kind {
        BlockKind::FixedEvent(event) => {
            record.block_type = TYPE_FIXED_EVENT.to_string();
            record.priority = event.priority.ordinal();
            record.repeat_interval_days = event.repeat_interval_days.map(i64::from);
        }
        BlockKind::Task(task) => {
            record.deadline = task.deadline.map(|deadline| deadline.to_rfc3339());
            if let Completion::Completed { at } = &task.completion {
                record.is_completed = true;
                record.completed_at = Some(at.to_rfc3339());
            }
        }
    }
    record
}

pub fn decode_block(record: &BlockRecord) -> Result<Block, InfraError> {
    let start = parse_optional_rfc3339(record.start.as_deref(), "start")?;
    let duration_minutes = u32::try_from(record.duration_minutes)
        .ok()
        .filter(|minutes| *minutes > 0)
        .ok_or_else(|| {
            InfraError::InvalidRecord(format!(
                "block {} has invalid duration {}",
                record.id, record.duration_minutes
            ))
        })?;

    let kind = match record.block_type.trim().to_ascii_lowercase().as_str() {
        TYPE_FIXED_EVENT | "event" => BlockKind::FixedEvent(FixedEvent {
            priority: Priority::from_ordinal(record.priority),
            repeat_interval_days: record
                .repeat_interval_days
                .map(|days| {
                    u32::try_from(days).ok().filter(|days| *days > 0).ok_or_else(|| {
                        InfraError::InvalidRecord(format!(
                            "block {} has invalid repeat interval {days}",
                            record.id
                        ))
                    })
                })
                .transpose()?,
            occurrence_of: None,
        }),
        TYPE_TASK => {
            let completion = if record.is_completed {
                let at = parse_optional_rfc3339(record.completed_at.as_deref(), "completed_at")?
                    .or(start)
                    .ok_or_else(|| {
                        InfraError::InvalidRecord(format!(
                            "completed block {} has no completion time",
                            record.id
                        ))
                    })?;
                Completion::Completed { at }
            } else {
                Completion::Pending
            };
            BlockKind::Task(TaskDetails {
                deadline: parse_optional_rfc3339(record.deadline.as_deref(), "deadline")?,
                is_fixed: record.is_fixed,
                completion,
                generated: None,
            })
        }
        other => {
            return Err(InfraError::InvalidRecord(format!(
                "unsupported block type: {other}"
            )))
        }
    };

    let block = Block {
        id: record.id.trim().to_string(),
        name: record.name.trim().to_string(),
        start,
        duration_minutes,
        location: normalize_optional(record.location.as_deref()),
        notes: normalize_optional(record.notes.as_deref()),
        colour: normalize_optional(record.colour.as_deref()),
        kind,
    };
    block.validate().map_err(InfraError::InvalidRecord)?;
    Ok(block)
}

pub fn export_json(blocks: &[Block]) -> Result<String, InfraError> {
    let document = BlockDocument {
        schema: DOCUMENT_SCHEMA,
        blocks: blocks.iter().map(encode_block).collect(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

pub fn import_json(raw: &str) -> Result<Vec<Block>, InfraError> {
    let document: BlockDocument = serde_json::from_str(raw)?;
    if document.schema != DOCUMENT_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported block document schema {}",
            document.schema
        )));
    }
    document.blocks.iter().map(decode_block).collect()
}

fn parse_optional_rfc3339(
    value: Option<&str>,
    field_name: &str,
) -> Result<Option<DateTime<Utc>>, InfraError> {
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(value)
        .map(|value| Some(value.with_timezone(&Utc)))
        .map_err(|error| {
            InfraError::InvalidRecord(format!("invalid block {field_name} '{value}': {error}"))
        })
}

fn normalize_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_blocks() -> Vec<Block> {
        let mut done = Block::task("Reading", 45, None)
            .with_id("tsk-reading")
            .with_start(fixed_time("2026-02-15T10:00:00Z"));
        if let Some(task) = done.as_task_mut() {
            task.completion = Completion::Completed {
                at: fixed_time("2026-02-15T10:45:00Z"),
            };
        }
        vec![
            Block::task("Essay", 60, Some(fixed_time("2026-02-16T13:00:00Z")))
                .with_id("tsk-essay")
                .with_notes("chapter two"),
            Block::fixed_event("Lecture", fixed_time("2026-02-16T10:00:00Z"), 120)
                .with_id("evt-lecture")
                .with_location("Room 101")
                .with_priority(Priority::High)
                .repeating_every(7),
            done,
        ]
    }

    #[test]
    fn records_preserve_block_fields() {
        for block in sample_blocks() {
            let decoded = decode_block(&encode_block(&block)).expect("decode record");
            assert_eq!(decoded, block);
        }
    }

    #[test]
    fn export_document_carries_schema_and_type_tags() {
        let raw = export_json(&sample_blocks()).expect("export");
        let parsed: serde_json::Value = serde_json::from_str(&raw).expect("valid json");
        assert_eq!(parsed["schema"], 1);
        assert_eq!(parsed["blocks"][0]["type"], "task");
        assert_eq!(parsed["blocks"][1]["type"], "fixed_event");
        assert_eq!(parsed["blocks"][1]["priority"], 2);
        assert_eq!(import_json(&raw).expect("import"), sample_blocks());
    }

    #[test]
    fn decode_rejects_bad_records() {
        let mut record = encode_block(&sample_blocks()[0]);
        record.start = Some("yesterday".to_string());
        assert!(matches!(
            decode_block(&record),
            Err(InfraError::InvalidRecord(_))
        ));

        let mut record = encode_block(&sample_blocks()[1]);
        record.start = None;
        assert!(decode_block(&record).is_err(), "fixed events need a start");

        let mut record = encode_block(&sample_blocks()[0]);
        record.block_type = "reminder".to_string();
        assert!(decode_block(&record).is_err());

        let mut record = encode_block(&sample_blocks()[0]);
        record.duration_minutes = 0;
        assert!(decode_block(&record).is_err());
    }

    #[test]
    fn completed_record_without_timestamp_falls_back_to_start() {
        let mut record = encode_block(&sample_blocks()[2]);
        record.completed_at = None;
        let block = decode_block(&record).expect("decode");
        assert_eq!(
            block.as_task().map(|task| task.completion.clone()),
            Some(Completion::Completed {
                at: fixed_time("2026-02-15T10:00:00Z")
            })
        );
    }

    #[test]
    fn import_rejects_unknown_schema() {
        assert!(matches!(
            import_json(r#"{"schema":3,"blocks":[]}"#),
            Err(InfraError::InvalidConfig(_))
        ));
    }
}
