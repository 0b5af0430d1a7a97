//! Append-only event log of turn records.
//!
//! Every accepted action and every runtime fault produces exactly one
//! [`TurnRecord`], appended in application order. Spectator and marketplace
//! collaborators consume the log through [`EventLog::stream_since`], which is
//! restartable by sequence number with no gaps or duplicates.
//!
//! The in-memory log never fails. Durable mode mirrors appends into a
//! CRC-framed file that is replayed at open, so sequences continue across a
//! restart; a flush failure is surfaced as a persistence error *after* the
//! in-memory append, so an applied action is always recorded.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::action::Action;
use crate::agent::AgentId;
use crate::error::{BridgeError, BridgeResult};
use crate::persist::codec;
use crate::world::{ChangedField, WorldSnapshot};

/// Why an admitted action was rejected.
///
/// Validation failures never reach the log; these are runtime faults that
/// spectators should still see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// The emulator adapter faulted (after one retry).
    AdapterFault {
        /// Adapter error text.
        message: String,
    },
    /// The post-action memory window could not be decoded.
    Decode {
        /// Decode error text.
        message: String,
    },
}

/// Outcome of one admitted action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The action was applied to the emulator.
    Applied {
        /// False when a movement hit an impassable tile (a no-op, not an
        /// error).
        moved: bool,
    },
    /// The action was admitted but a runtime fault prevented it.
    Rejected {
        /// The fault.
        reason: RejectReason,
    },
}

impl TurnOutcome {
    /// Returns true for applied outcomes.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// One entry in the event log. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Strictly monotonic, gap-free sequence number (starts at 1).
    pub sequence: u64,
    /// The acting agent.
    pub agent_id: AgentId,
    /// The acting agent's name at the time of the turn.
    pub agent_name: String,
    /// The action taken.
    pub action: Action,
    /// Applied or rejected, with reason.
    pub outcome: TurnOutcome,
    /// World state strictly after this action; `None` when the world was
    /// unreadable (rejected outcomes only).
    pub snapshot: Option<WorldSnapshot>,
    /// Fields that changed relative to the previous snapshot.
    pub changed: Vec<ChangedField>,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

/// The unsequenced payload of a record, produced by the arbiter.
#[derive(Debug, Clone)]
pub struct TurnDraft {
    /// The acting agent.
    pub agent_id: AgentId,
    /// The acting agent's name.
    pub agent_name: String,
    /// The action taken.
    pub action: Action,
    /// Applied or rejected.
    pub outcome: TurnOutcome,
    /// Post-action snapshot, if readable.
    pub snapshot: Option<WorldSnapshot>,
    /// Diff against the previous snapshot.
    pub changed: Vec<ChangedField>,
}

struct DurableSink {
    writer: BufWriter<File>,
}

#[derive(Default)]
struct LogInner {
    records: RwLock<Vec<TurnRecord>>,
    durable: Option<Mutex<DurableSink>>,
}

/// Durable, ordered, append-only record of every turn.
///
/// Cloning yields another handle to the same log.
#[derive(Clone, Default)]
pub struct EventLog {
    inner: Arc<LogInner>,
}

impl EventLog {
    /// Creates an in-memory log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a durable log, replaying any existing file.
    ///
    /// Recovery stops at the first torn or corrupt entry and truncates the
    /// file there; sequences continue from the last valid record.
    ///
    /// # Errors
    /// I/O failures opening or replaying the file.
    pub fn open_durable(path: &Path) -> BridgeResult<Self> {
        let mut records = Vec::new();

        let exists = path.exists();
        if exists {
            let file = File::open(path)?;
            let mut reader = BufReader::new(file);
            codec::read_header(&mut reader)?;

            let mut valid_end = codec::HEADER_LEN;
            loop {
                match codec::decode::<TurnRecord>(&mut reader) {
                    Ok(record) => {
                        records.push(record);
                        valid_end = reader.stream_position()?;
                    }
                    Err(_) => {
                        // Clean EOF or torn tail: either way, drop everything
                        // past the last valid entry (a no-op at clean EOF).
                        drop(reader);
                        let file = OpenOptions::new().write(true).open(path)?;
                        file.set_len(valid_end)?;
                        break;
                    }
                }
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if !exists {
            codec::write_header(&mut file)?;
            file.sync_all()?;
        }

        Ok(Self {
            inner: Arc::new(LogInner {
                records: RwLock::new(records),
                durable: Some(Mutex::new(DurableSink {
                    writer: BufWriter::new(file),
                })),
            }),
        })
    }

    /// Appends a record, assigning the next sequence number.
    ///
    /// The in-memory append cannot fail and the sequence is assigned under
    /// the writer lock, so numbers are gap-free and match append order.
    ///
    /// # Errors
    /// `PersistError` if the durable flush fails; the record is still in the
    /// in-memory log and remains reachable through [`Self::get`].
    pub fn append(&self, draft: TurnDraft) -> BridgeResult<TurnRecord> {
        let record = {
            let mut records = self
                .inner
                .records
                .write()
                .map_err(|_| BridgeError::internal("event log lock poisoned"))?;
            let sequence = records.last().map_or(0, |r| r.sequence) + 1;
            let record = TurnRecord {
                sequence,
                agent_id: draft.agent_id,
                agent_name: draft.agent_name,
                action: draft.action,
                outcome: draft.outcome,
                snapshot: draft.snapshot,
                changed: draft.changed,
                recorded_at: Utc::now(),
            };
            records.push(record.clone());
            record
        };

        if let Some(sink) = &self.inner.durable {
            self.flush_durable(sink, &record)?;
        }

        Ok(record)
    }

    fn flush_durable(&self, sink: &Mutex<DurableSink>, record: &TurnRecord) -> BridgeResult<()> {
        let mut sink = sink
            .lock()
            .map_err(|_| BridgeError::internal("durable log lock poisoned"))?;
        let encoded = codec::encode(record)?;
        sink.writer.write_all(&encoded)?;
        sink.writer.flush()?;
        Ok(())
    }

    /// Returns the record with the given sequence number, if written.
    pub fn get(&self, sequence: u64) -> Option<TurnRecord> {
        let records = self.inner.records.read().ok()?;
        let first = records.first()?.sequence;
        let idx = sequence.checked_sub(first)? as usize;
        records.get(idx).cloned()
    }

    /// Sequence number of the newest record, 0 when empty.
    pub fn last_sequence(&self) -> u64 {
        self.inner
            .records
            .read()
            .ok()
            .and_then(|r| r.last().map(|rec| rec.sequence))
            .unwrap_or(0)
    }

    /// Number of records held.
    pub fn len(&self) -> usize {
        self.inner.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Returns true if no record has been appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazy stream of records with sequence greater than `since`.
    ///
    /// Finite up to "now": the stream ends once it catches up, and a new
    /// stream started from the last seen sequence resumes without gaps or
    /// duplicates. This is how spectators reconnect.
    #[must_use]
    pub fn stream_since(&self, since: u64) -> LogStream {
        LogStream {
            log: self.clone(),
            next: since + 1,
        }
    }
}

/// Iterator over log records from a starting sequence number.
pub struct LogStream {
    log: EventLog,
    next: u64,
}

impl LogStream {
    /// The sequence number the next `next()` call will try to yield.
    #[must_use]
    pub const fn position(&self) -> u64 {
        self.next
    }
}

impl Iterator for LogStream {
    type Item = TurnRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.log.get(self.next)?;
        self.next += 1;
        Some(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Direction;

    fn draft(name: &str, moved: bool) -> TurnDraft {
        TurnDraft {
            agent_id: AgentId::new(),
            agent_name: name.to_string(),
            action: Action::Move(Direction::Up),
            outcome: TurnOutcome::Applied { moved },
            snapshot: None,
            changed: Vec::new(),
        }
    }

    #[test]
    fn append_assigns_contiguous_sequences() {
        let log = EventLog::new();
        let a = log.append(draft("A", true)).unwrap();
        let b = log.append(draft("B", false)).unwrap();

        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 2);
        assert_eq!(log.last_sequence(), 2);
    }

    #[test]
    fn stream_since_yields_suffix_and_stops_at_now() {
        let log = EventLog::new();
        for i in 0..5 {
            log.append(draft(&format!("agent-{i}"), true)).unwrap();
        }

        let collected: Vec<u64> = log.stream_since(2).map(|r| r.sequence).collect();
        assert_eq!(collected, vec![3, 4, 5]);
    }

    #[test]
    fn stream_restart_has_no_gaps_or_duplicates() {
        let log = EventLog::new();
        for _ in 0..4 {
            log.append(draft("A", true)).unwrap();
        }

        let mut stream = log.stream_since(0);
        let first = stream.next().unwrap();
        let second = stream.next().unwrap();

        // Reconnect from the last seen sequence.
        let resumed: Vec<u64> = log.stream_since(second.sequence).map(|r| r.sequence).collect();
        assert_eq!(first.sequence, 1);
        assert_eq!(resumed, vec![3, 4]);
    }

    #[test]
    fn stream_sees_records_appended_after_it_drained() {
        let log = EventLog::new();
        log.append(draft("A", true)).unwrap();

        let mut stream = log.stream_since(0);
        assert_eq!(stream.next().unwrap().sequence, 1);
        assert!(stream.next().is_none());

        log.append(draft("A", true)).unwrap();
        assert_eq!(stream.next().unwrap().sequence, 2);
    }

    #[test]
    fn rejected_outcome_round_trips_through_serde() {
        let outcome = TurnOutcome::Rejected {
            reason: RejectReason::AdapterFault {
                message: "unreadable memory".to_string(),
            },
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("adapter_fault"));
        let back: TurnOutcome = serde_json::from_str(&json).unwrap();
        assert!(!back.is_applied());
    }

    #[test]
    fn durable_log_continues_sequences_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");

        {
            let log = EventLog::open_durable(&path).unwrap();
            log.append(draft("A", true)).unwrap();
            log.append(draft("B", true)).unwrap();
        }

        let log = EventLog::open_durable(&path).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log.last_sequence(), 2);

        let c = log.append(draft("C", true)).unwrap();
        assert_eq!(c.sequence, 3);
    }

    #[test]
    fn durable_log_truncates_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");

        {
            let log = EventLog::open_durable(&path).unwrap();
            log.append(draft("A", true)).unwrap();
        }

        // Simulate a crash mid-append.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[1, 0xFF, 0xFF]).unwrap();
        }

        let log = EventLog::open_durable(&path).unwrap();
        assert_eq!(log.len(), 1);

        // The truncated file accepts clean appends again.
        let b = log.append(draft("B", true)).unwrap();
        assert_eq!(b.sequence, 2);
        drop(log);

        let reopened = EventLog::open_durable(&path).unwrap();
        assert_eq!(reopened.len(), 2);
    }
}
