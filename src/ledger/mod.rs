pub mod store;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use store::LedgerStore;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("score database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("score record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelScore {
    pub correct: u32,
    pub total: u32,
}

/// Persistent per-user record. Owned by the ledger; the engine only reads
/// it and appends completed-quiz deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: u64,
    pub display_name: String,
    pub selected_level: Option<String>,
    pub scores: BTreeMap<String, LevelScore>,
    /// Opaque handle to the pinned summary message, if one exists.
    pub summary_ref: Option<i64>,
}

impl UserRecord {
    pub fn new(user_id: u64, display_name: &str) -> Self {
        Self {
            user_id,
            display_name: display_name.to_string(),
            selected_level: None,
            scores: BTreeMap::new(),
            summary_ref: None,
        }
    }
}

/// Emitted when a row could not be persisted even after retries. The
/// in-memory state stays as the user saw it; the loss is for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteFailure {
    pub user_id: u64,
}

const WRITE_ATTEMPTS: u32 = 5;
const WRITE_BACKOFF: Duration = Duration::from_millis(500);

/// Per-user cumulative score ledger. Mutations apply to the in-memory map
/// synchronously (visible to the very next event) and queue a row snapshot
/// for the background writer, which retries with backoff.
pub struct ScoreLedger {
    records: RwLock<HashMap<u64, UserRecord>>,
    persist: mpsc::UnboundedSender<UserRecord>,
}

impl ScoreLedger {
    /// Load existing records and spawn the write-behind task. Must run
    /// inside a tokio runtime.
    pub fn start(
        mut store: Box<dyn LedgerStore>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<WriteFailure>), LedgerError> {
        let records: HashMap<u64, UserRecord> = store
            .load_all()?
            .into_iter()
            .map(|record| (record.user_id, record))
            .collect();
        log::info!("score ledger loaded, {} user record(s)", records.len());

        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        tokio::spawn(persist_loop(store, persist_rx, failure_tx));

        let ledger = Arc::new(Self {
            records: RwLock::new(records),
            persist: persist_tx,
        });
        Ok((ledger, failure_rx))
    }

    pub fn get(&self, user_id: u64) -> Option<UserRecord> {
        self.records
            .read()
            .expect("ledger map poisoned")
            .get(&user_id)
            .cloned()
    }

    pub fn get_or_create(&self, user_id: u64, display_name: &str) -> UserRecord {
        let mut records = self.records.write().expect("ledger map poisoned");
        if let Some(record) = records.get(&user_id) {
            return record.clone();
        }
        let record = UserRecord::new(user_id, display_name);
        records.insert(user_id, record.clone());
        drop(records);

        self.queue_write(&record);
        record
    }

    pub fn set_level(&self, user_id: u64, level: &str) -> Option<UserRecord> {
        let mut records = self.records.write().expect("ledger map poisoned");
        let record = records.get_mut(&user_id)?;
        record.selected_level = Some(level.to_string());
        let snapshot = record.clone();
        drop(records);

        self.queue_write(&snapshot);
        Some(snapshot)
    }

    /// The only mutator of `scores`. Atomic per user; totals never decrease
    /// because only unsigned deltas are added.
    pub fn append_score(
        &self,
        user_id: u64,
        level: &str,
        correct_delta: u32,
        total_delta: u32,
    ) -> UserRecord {
        let mut records = self.records.write().expect("ledger map poisoned");
        let record = records.entry(user_id).or_insert_with(|| {
            log::warn!("append_score for unknown user {user_id}, creating a bare record");
            UserRecord::new(user_id, "")
        });
        let score = record.scores.entry(level.to_string()).or_default();
        score.correct += correct_delta;
        score.total += total_delta;
        let snapshot = record.clone();
        drop(records);

        self.queue_write(&snapshot);
        snapshot
    }

    pub fn get_summary_ref(&self, user_id: u64) -> Option<i64> {
        self.records
            .read()
            .expect("ledger map poisoned")
            .get(&user_id)
            .and_then(|record| record.summary_ref)
    }

    pub fn set_summary_ref(&self, user_id: u64, summary_ref: i64) {
        let mut records = self.records.write().expect("ledger map poisoned");
        let Some(record) = records.get_mut(&user_id) else {
            return;
        };
        record.summary_ref = Some(summary_ref);
        let snapshot = record.clone();
        drop(records);

        self.queue_write(&snapshot);
    }

    fn queue_write(&self, record: &UserRecord) {
        // Send only fails when the writer task is gone, i.e. at shutdown.
        let _ = self.persist.send(record.clone());
    }
}

async fn persist_loop(
    mut store: Box<dyn LedgerStore>,
    mut queue: mpsc::UnboundedReceiver<UserRecord>,
    failures: mpsc::UnboundedSender<WriteFailure>,
) {
    while let Some(record) = queue.recv().await {
        let mut written = false;
        for attempt in 0..WRITE_ATTEMPTS {
            match store.upsert(&record) {
                Ok(()) => {
                    written = true;
                    break;
                }
                Err(err) => {
                    log::warn!(
                        "score write for user {} failed (attempt {}/{WRITE_ATTEMPTS}): {err}",
                        record.user_id,
                        attempt + 1
                    );
                    sleep(WRITE_BACKOFF * 2u32.pow(attempt)).await;
                }
            }
        }
        if !written {
            log::error!(
                "score write for user {} lost after {WRITE_ATTEMPTS} attempts, record was {record:?}",
                record.user_id
            );
            let _ = failures.send(WriteFailure {
                user_id: record.user_id,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::store::MemoryStore;
    use super::*;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    fn memory_ledger() -> (Arc<ScoreLedger>, mpsc::UnboundedReceiver<WriteFailure>) {
        ScoreLedger::start(Box::new(MemoryStore::new())).unwrap()
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let (ledger, _failures) = memory_ledger();

        let first = ledger.get_or_create(1, "Alice");
        let second = ledger.get_or_create(1, "Someone Else");

        assert_eq!(first, second);
        assert_eq!(second.display_name, "Alice");
        assert_eq!(ledger.get(2), None);
    }

    #[tokio::test]
    async fn append_accumulates_and_never_decreases() {
        let (ledger, _failures) = memory_ledger();
        ledger.get_or_create(1, "Alice");

        ledger.append_score(1, "junior", 2, 3);
        let record = ledger.append_score(1, "junior", 0, 5);

        let score = record.scores["junior"];
        assert_eq!((score.correct, score.total), (2, 8));
        // other levels untouched
        assert!(!record.scores.contains_key("senior"));
    }

    #[tokio::test]
    async fn concurrent_appends_for_one_user_all_land() {
        let (ledger, _failures) = memory_ledger();
        ledger.get_or_create(1, "Alice");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.append_score(1, "junior", 1, 1);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let score = ledger.get(1).unwrap().scores["junior"];
        assert_eq!((score.correct, score.total), (16, 16));
    }

    #[tokio::test]
    async fn users_do_not_interfere() {
        let (ledger, _failures) = memory_ledger();
        ledger.get_or_create(1, "Alice");
        ledger.get_or_create(2, "Bob");

        ledger.append_score(1, "junior", 3, 3);
        ledger.append_score(2, "senior", 1, 4);

        assert_eq!(ledger.get(1).unwrap().scores["junior"].total, 3);
        assert!(!ledger.get(1).unwrap().scores.contains_key("senior"));
        assert_eq!(ledger.get(2).unwrap().scores["senior"].correct, 1);
    }

    #[tokio::test]
    async fn level_and_summary_ref_roundtrip() {
        let (ledger, _failures) = memory_ledger();

        assert_eq!(ledger.set_level(1, "junior"), None);

        ledger.get_or_create(1, "Alice");
        let record = ledger.set_level(1, "middle").unwrap();
        assert_eq!(record.selected_level.as_deref(), Some("middle"));

        assert_eq!(ledger.get_summary_ref(1), None);
        ledger.set_summary_ref(1, 999);
        assert_eq!(ledger.get_summary_ref(1), Some(999));
    }

    struct RecordingStore {
        seen: Arc<StdMutex<Vec<UserRecord>>>,
        notify: Arc<Notify>,
    }

    impl LedgerStore for RecordingStore {
        fn load_all(&mut self) -> Result<Vec<UserRecord>, LedgerError> {
            Ok(Vec::new())
        }

        fn upsert(&mut self, record: &UserRecord) -> Result<(), LedgerError> {
            self.seen.lock().unwrap().push(record.clone());
            self.notify.notify_one();
            Ok(())
        }
    }

    #[tokio::test]
    async fn mutations_reach_the_store() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let notify = Arc::new(Notify::new());
        let (ledger, _failures) = ScoreLedger::start(Box::new(RecordingStore {
            seen: seen.clone(),
            notify: notify.clone(),
        }))
        .unwrap();

        ledger.get_or_create(1, "Alice");
        notify.notified().await;

        let written = seen.lock().unwrap().clone();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].display_name, "Alice");
    }

    /// Fails the first `failures_left` upserts, then behaves.
    struct FlakyStore {
        failures_left: u32,
        seen: Arc<StdMutex<Vec<UserRecord>>>,
        notify: Arc<Notify>,
    }

    impl LedgerStore for FlakyStore {
        fn load_all(&mut self) -> Result<Vec<UserRecord>, LedgerError> {
            Ok(Vec::new())
        }

        fn upsert(&mut self, record: &UserRecord) -> Result<(), LedgerError> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(LedgerError::Sqlite(rusqlite::Error::InvalidQuery));
            }
            self.seen.lock().unwrap().push(record.clone());
            self.notify.notify_one();
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn writes_are_retried_with_backoff() {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let notify = Arc::new(Notify::new());
        let (ledger, mut failures) = ScoreLedger::start(Box::new(FlakyStore {
            failures_left: WRITE_ATTEMPTS - 1,
            seen: seen.clone(),
            notify: notify.clone(),
        }))
        .unwrap();

        ledger.get_or_create(1, "Alice");
        notify.notified().await;

        assert_eq!(seen.lock().unwrap().len(), 1);
        assert!(failures.try_recv().is_err());
    }

    struct BrokenStore;

    impl LedgerStore for BrokenStore {
        fn load_all(&mut self) -> Result<Vec<UserRecord>, LedgerError> {
            Ok(Vec::new())
        }

        fn upsert(&mut self, _record: &UserRecord) -> Result<(), LedgerError> {
            Err(LedgerError::Sqlite(rusqlite::Error::InvalidQuery))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_a_failure() {
        let (ledger, mut failures) = ScoreLedger::start(Box::new(BrokenStore)).unwrap();

        ledger.get_or_create(7, "Alice");
        let failure = failures.recv().await.unwrap();

        assert_eq!(failure, WriteFailure { user_id: 7 });
        // the in-memory record is untouched by the lost write
        assert_eq!(ledger.get(7).unwrap().display_name, "Alice");
    }
}
