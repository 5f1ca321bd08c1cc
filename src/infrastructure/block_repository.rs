use crate::domain::models::Block;
use crate::infrastructure::block_mapper::{decode_block, encode_block, BlockRecord};
use crate::infrastructure::error::InfraError;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub trait BlockRepository: Send + Sync {
    fn load_all(&self) -> Result<Vec<Block>, InfraError>;
    /// Replaces the stored set; callers pass only persistable blocks.
    fn replace_all(&self, blocks: &[Block]) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteBlockRepository {
    db_path: PathBuf,
}

impl SqliteBlockRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }
}

impl BlockRepository for SqliteBlockRepository {
    fn load_all(&self) -> Result<Vec<Block>, InfraError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT id, block_type, name, start_at, duration_minutes, location, notes, colour,
                    is_fixed, priority, repeat_interval_days, deadline, is_completed, completed_at
             FROM blocks
             ORDER BY position ASC",
        )?;
        let records = statement
            .query_map([], |row| {
                Ok(BlockRecord {
                    id: row.get(0)?,
                    block_type: row.get(1)?,
                    name: row.get(2)?,
                    start: row.get(3)?,
                    duration_minutes: row.get(4)?,
                    location: row.get(5)?,
                    notes: row.get(6)?,
                    colour: row.get(7)?,
                    is_fixed: row.get(8)?,
                    priority: row.get(9)?,
                    repeat_interval_days: row.get(10)?,
                    deadline: row.get(11)?,
                    is_completed: row.get(12)?,
                    completed_at: row.get(13)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        records.iter().map(decode_block).collect()
    }

    fn replace_all(&self, blocks: &[Block]) -> Result<(), InfraError> {
        let mut connection = self.connect()?;
        let transaction = connection.transaction()?;
        transaction.execute("DELETE FROM blocks", [])?;
        for (position, block) in blocks.iter().enumerate() {
            let record = encode_block(block);
            transaction.execute(
                "INSERT INTO blocks (
                   id, position, block_type, name, start_at, duration_minutes, location, notes,
                   colour, is_fixed, priority, repeat_interval_days, deadline, is_completed,
                   completed_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    record.id,
                    position as i64,
                    record.block_type,
                    record.name,
                    record.start,
                    record.duration_minutes,
                    record.location,
                    record.notes,
                    record.colour,
                    record.is_fixed,
                    record.priority,
                    record.repeat_interval_days,
                    record.deadline,
                    record.is_completed,
                    record.completed_at,
                ],
            )?;
        }
        transaction.commit()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBlockRepository {
    blocks: Mutex<Vec<Block>>,
}

impl InMemoryBlockRepository {
    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks: Mutex::new(blocks),
        }
    }
}

impl BlockRepository for InMemoryBlockRepository {
    fn load_all(&self) -> Result<Vec<Block>, InfraError> {
        let blocks = self
            .blocks
            .lock()
            .map_err(|error| {
                InfraError::InvalidConfig(format!("block store lock poisoned: {error}"))
            })?;
        Ok(blocks.clone())
    }

    fn replace_all(&self, blocks: &[Block]) -> Result<(), InfraError> {
        let mut stored = self
            .blocks
            .lock()
            .map_err(|error| {
                InfraError::InvalidConfig(format!("block store lock poisoned: {error}"))
            })?;
        *stored = blocks.to_vec();
        Ok(())
    }
}
