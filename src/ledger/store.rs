use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection};

use super::{LedgerError, UserRecord};

/// Narrow interface to the physical store: load everything at startup,
/// write whole-row snapshots afterwards. The ledger keeps the authoritative
/// state in memory, so the store never needs partial updates.
pub trait LedgerStore: Send {
    fn load_all(&mut self) -> Result<Vec<UserRecord>, LedgerError>;
    fn upsert(&mut self, record: &UserRecord) -> Result<(), LedgerError>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                level TEXT,
                scores TEXT NOT NULL DEFAULT '{}',
                summary_ref INTEGER
            );
            "#,
        )?;
        Ok(Self { conn })
    }
}

impl LedgerStore for SqliteStore {
    fn load_all(&mut self) -> Result<Vec<UserRecord>, LedgerError> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id, name, level, scores, summary_ref FROM users")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<i64>>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (user_id, display_name, selected_level, scores, summary_ref) = row?;
            records.push(UserRecord {
                user_id: user_id as u64,
                display_name,
                selected_level,
                scores: serde_json::from_str(&scores)?,
                summary_ref,
            });
        }
        Ok(records)
    }

    fn upsert(&mut self, record: &UserRecord) -> Result<(), LedgerError> {
        let scores = serde_json::to_string(&record.scores)?;
        self.conn.execute(
            "INSERT INTO users (user_id, name, level, scores, summary_ref)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                 name = excluded.name,
                 level = excluded.level,
                 scores = excluded.scores,
                 summary_ref = excluded.summary_ref",
            params![
                record.user_id as i64,
                record.display_name,
                record.selected_level,
                scores,
                record.summary_ref,
            ],
        )?;
        Ok(())
    }
}

/// Ephemeral store, used in tests and for running without a database file.
#[derive(Default)]
pub struct MemoryStore {
    records: HashMap<u64, UserRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn load_all(&mut self) -> Result<Vec<UserRecord>, LedgerError> {
        Ok(self.records.values().cloned().collect())
    }

    fn upsert(&mut self, record: &UserRecord) -> Result<(), LedgerError> {
        self.records.insert(record.user_id, record.clone());
        Ok(())
    }
}
