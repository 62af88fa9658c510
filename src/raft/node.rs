//! Single-node log backend.
//!
//! Provides the [`Applier`] contract without a peer set: every committed
//! command is framed into an append-only log under the data directory,
//! applied to the state machine, and compacted into snapshots once the
//! log grows past a threshold. Startup restores the newest snapshot and
//! replays the log suffix.
//!
//! A node can be switched into follower mode (used to exercise redirect
//! paths): all writes and medium/high reads then answer with a
//! `TRY <addr>` redirect, or `leader unknown` when no address is known.

use super::{Applier, Mutate, Respond, StateMachine};
use crate::core::config::Level;
use crate::core::error::CommandError;
use crate::resp::{Command, Reply};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const LOG_FILE: &str = "log.bin";
const SNAPSHOT_FILE: &str = "snapshot.snap";
const SNAPSHOT_TMP: &str = "snapshot.snap.tmp";

/// Entries between snapshots before the log is compacted.
const COMPACT_THRESHOLD: u64 = 16 * 1024;

/// Medium durability syncs at most once per this interval.
const MEDIUM_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// One framed log record. A record with empty data is a no-op, appended
/// by the high-consistency read gate.
#[derive(Debug, Serialize, Deserialize)]
struct LogRecord {
    index: u64,
    data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Role {
    Leader,
    Follower { leader: Option<String> },
}

struct LogState {
    file: File,
    next_index: u64,
    entries_since_compact: u64,
    last_sync: Instant,
}

/// A single-node replicated-log backend.
pub struct LogNode {
    dir: PathBuf,
    durability: Level,
    consistency: Level,
    machine: Arc<dyn StateMachine>,
    log: Mutex<LogState>,
    role: Mutex<Role>,
}

impl LogNode {
    /// Open the node, restoring the newest snapshot and replaying the log.
    pub fn open(
        dir: impl AsRef<Path>,
        durability: Level,
        consistency: Level,
        machine: Arc<dyn StateMachine>,
    ) -> Result<Arc<Self>, CommandError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| CommandError::err(format!("creating data dir: {e}")))?;

        let snap_path = dir.join(SNAPSHOT_FILE);
        if snap_path.exists() {
            let mut r = BufReader::new(
                File::open(&snap_path)
                    .map_err(|e| CommandError::err(format!("opening snapshot: {e}")))?,
            );
            machine.restore(&mut r)?;
            info!(path = %snap_path.display(), "restored snapshot");
        }

        let log_path = dir.join(LOG_FILE);
        let mut replayed = 0u64;
        let mut next_index = 1u64;
        if log_path.exists() {
            let mut r = BufReader::new(
                File::open(&log_path)
                    .map_err(|e| CommandError::err(format!("opening log: {e}")))?,
            );
            while let Some(record) = read_record(&mut r)? {
                next_index = record.index + 1;
                if record.data.is_empty() {
                    continue;
                }
                let cmd = Command::decode(&record.data)?;
                // command-level failures are ordinary replay outcomes
                if let Err(err) = machine.apply(&cmd) {
                    debug!(%err, index = record.index, "replayed entry returned error");
                }
                replayed += 1;
            }
            info!(replayed, "log replay complete");
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| CommandError::err(format!("opening log for append: {e}")))?;
        file.seek(SeekFrom::End(0))
            .map_err(|e| CommandError::err(format!("seeking log: {e}")))?;

        Ok(Arc::new(Self {
            dir,
            durability,
            consistency,
            machine,
            log: Mutex::new(LogState {
                file,
                next_index,
                entries_since_compact: replayed,
                last_sync: Instant::now(),
            }),
            role: Mutex::new(Role::Leader),
        }))
    }

    /// Whether this node currently leads.
    pub fn is_leader(&self) -> bool {
        *self.role.lock() == Role::Leader
    }

    /// Demote to follower, redirecting clients to `leader` when known.
    /// Test-facing: a real consensus backend drives this from elections.
    pub fn set_follower(&self, leader: Option<String>) {
        *self.role.lock() = Role::Follower { leader };
    }

    /// Promote back to leader.
    pub fn set_leader(&self) {
        *self.role.lock() = Role::Leader;
    }

    fn redirect(&self) -> CommandError {
        match &*self.role.lock() {
            Role::Leader => CommandError::LeaderUnknown,
            Role::Follower { leader: Some(addr) } => CommandError::TryLeader(addr.clone()),
            Role::Follower { leader: None } => CommandError::LeaderUnknown,
        }
    }

    fn append(&self, data: Vec<u8>) -> Result<(), CommandError> {
        let mut log = self.log.lock();
        let record = LogRecord { index: log.next_index, data };
        let frame = bincode::serialize(&record)
            .map_err(|e| CommandError::err(format!("encoding log record: {e}")))?;
        let len = (frame.len() as u32).to_be_bytes();
        let write = |f: &mut File| -> std::io::Result<()> {
            f.write_all(&len)?;
            f.write_all(&frame)
        };
        write(&mut log.file)
            .map_err(|e| CommandError::err(format!("appending log record: {e}")))?;
        log.next_index += 1;
        log.entries_since_compact += 1;

        let sync_due = match self.durability {
            Level::High => true,
            Level::Medium => log.last_sync.elapsed() >= MEDIUM_SYNC_INTERVAL,
            Level::Low => false,
        };
        if sync_due {
            log.file
                .sync_data()
                .map_err(|e| CommandError::err(format!("syncing log: {e}")))?;
            log.last_sync = Instant::now();
        }

        if log.entries_since_compact >= COMPACT_THRESHOLD {
            if let Err(err) = self.compact(&mut log) {
                warn!(%err, "log compaction failed");
            }
        }
        Ok(())
    }

    /// Write a snapshot and truncate the log.
    fn compact(&self, log: &mut LogState) -> Result<(), CommandError> {
        let tmp = self.dir.join(SNAPSHOT_TMP);
        let mut w = File::create(&tmp)
            .map_err(|e| CommandError::err(format!("creating snapshot: {e}")))?;
        self.machine.snapshot(&mut w)?;
        w.sync_data()
            .map_err(|e| CommandError::err(format!("syncing snapshot: {e}")))?;
        std::fs::rename(&tmp, self.dir.join(SNAPSHOT_FILE))
            .map_err(|e| CommandError::err(format!("installing snapshot: {e}")))?;

        log.file = File::create(self.dir.join(LOG_FILE))
            .map_err(|e| CommandError::err(format!("truncating log: {e}")))?;
        log.entries_since_compact = 0;
        info!(next_index = log.next_index, "log compacted into snapshot");
        Ok(())
    }

    /// Force a compaction now. Exposed for tests and shutdown paths.
    pub fn compact_now(&self) -> Result<(), CommandError> {
        let mut log = self.log.lock();
        self.compact(&mut log)
    }

    /// Admit a read per the configured consistency level.
    fn read_gate(&self) -> Result<(), CommandError> {
        match self.consistency {
            Level::Low => Ok(()),
            Level::Medium => {
                if self.is_leader() {
                    Ok(())
                } else {
                    Err(self.redirect())
                }
            }
            Level::High => {
                if !self.is_leader() {
                    return Err(self.redirect());
                }
                // serialize the read behind everything already acknowledged
                self.append(Vec::new())
            }
        }
    }
}

impl Applier for LogNode {
    fn apply<'a>(
        &self,
        cmd: &Command,
        mutate: Option<Mutate<'a>>,
        respond: Option<Respond<'a>>,
    ) -> Result<Option<Reply>, CommandError> {
        match mutate {
            None => {
                self.read_gate()?;
                if let Some(r) = respond {
                    r(Reply::Null)?;
                }
                Ok(None)
            }
            Some(m) => {
                if !self.is_leader() {
                    return Err(self.redirect());
                }
                self.append(cmd.encode())?;
                let value = m()?;
                if let Some(r) = respond {
                    r(value.clone())?;
                }
                Ok(Some(value))
            }
        }
    }
}

fn read_record(r: &mut impl Read) -> Result<Option<LogRecord>, CommandError> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CommandError::err(format!("reading log frame: {e}"))),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut frame = vec![0u8; len];
    match r.read_exact(&mut frame) {
        Ok(()) => {}
        // a torn tail from an unclean shutdown ends replay
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CommandError::err(format!("reading log frame: {e}"))),
    }
    match bincode::deserialize(&frame) {
        Ok(record) => Ok(Some(record)),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PMutex;

    /// Counts applied commands; snapshot stores the count.
    struct CountingMachine {
        applied: PMutex<Vec<Command>>,
    }

    impl CountingMachine {
        fn new() -> Arc<Self> {
            Arc::new(Self { applied: PMutex::new(Vec::new()) })
        }
    }

    impl StateMachine for CountingMachine {
        fn apply(&self, cmd: &Command) -> Result<Reply, CommandError> {
            self.applied.lock().push(cmd.clone());
            Ok(Reply::ok())
        }

        fn snapshot(&self, w: &mut dyn std::io::Write) -> Result<(), CommandError> {
            let n = self.applied.lock().len() as u64;
            w.write_all(&n.to_be_bytes())
                .map_err(|e| CommandError::err(e))
        }

        fn restore(&self, r: &mut dyn std::io::Read) -> Result<(), CommandError> {
            let mut buf = [0u8; 8];
            r.read_exact(&mut buf).map_err(|e| CommandError::err(e))?;
            Ok(())
        }
    }

    #[test]
    fn test_write_appends_and_responds() {
        let dir = tempfile::tempdir().unwrap();
        let machine = CountingMachine::new();
        let node =
            LogNode::open(dir.path(), Level::High, Level::High, machine.clone()).unwrap();
        let cmd = Command::from_strs(&["set", "k", "v"]);
        let mut responded = None;
        let out = node
            .apply(
                &cmd,
                Some(Box::new(|| Ok(Reply::ok()))),
                Some(Box::new(|v| {
                    responded = Some(v);
                    Ok(())
                })),
            )
            .unwrap();
        assert_eq!(out, Some(Reply::ok()));
        assert_eq!(responded, Some(Reply::ok()));
    }

    #[test]
    fn test_replay_after_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let machine = CountingMachine::new();
            let node =
                LogNode::open(dir.path(), Level::High, Level::Low, machine).unwrap();
            for i in 0..5 {
                let cmd = Command::from_strs(&["set", &format!("k{i}"), "v"]);
                node.apply(&cmd, Some(Box::new(|| Ok(Reply::ok()))), None).unwrap();
            }
        }
        let machine = CountingMachine::new();
        let _node =
            LogNode::open(dir.path(), Level::High, Level::Low, machine.clone()).unwrap();
        assert_eq!(machine.applied.lock().len(), 5);
    }

    #[test]
    fn test_follower_redirects() {
        let dir = tempfile::tempdir().unwrap();
        let node = LogNode::open(dir.path(), Level::Low, Level::Medium, CountingMachine::new())
            .unwrap();
        node.set_follower(Some(":7482".to_string()));

        let cmd = Command::from_strs(&["set", "k", "v"]);
        let err = node
            .apply(&cmd, Some(Box::new(|| Ok(Reply::ok()))), None)
            .unwrap_err();
        assert_eq!(err, CommandError::TryLeader(":7482".to_string()));

        let read = Command::from_strs(&["get", "k"]);
        let err = node.apply(&read, None, None).unwrap_err();
        assert_eq!(err, CommandError::TryLeader(":7482".to_string()));

        node.set_follower(None);
        let err = node.apply(&read, None, None).unwrap_err();
        assert_eq!(err, CommandError::LeaderUnknown);
    }

    #[test]
    fn test_low_consistency_reads_pass_on_follower() {
        let dir = tempfile::tempdir().unwrap();
        let node = LogNode::open(dir.path(), Level::Low, Level::Low, CountingMachine::new())
            .unwrap();
        node.set_follower(None);
        let read = Command::from_strs(&["get", "k"]);
        let mut responded = false;
        node.apply(
            &read,
            None,
            Some(Box::new(|_| {
                responded = true;
                Ok(())
            })),
        )
        .unwrap();
        assert!(responded);
    }

    #[test]
    fn test_compaction_truncates_log() {
        let dir = tempfile::tempdir().unwrap();
        let machine = CountingMachine::new();
        let node =
            LogNode::open(dir.path(), Level::Low, Level::Low, machine.clone()).unwrap();
        for _ in 0..10 {
            let cmd = Command::from_strs(&["set", "k", "v"]);
            node.apply(&cmd, Some(Box::new(|| Ok(Reply::ok()))), None).unwrap();
        }
        node.compact_now().unwrap();
        assert!(dir.path().join(SNAPSHOT_FILE).exists());
        let meta = std::fs::metadata(dir.path().join(LOG_FILE)).unwrap();
        assert_eq!(meta.len(), 0);
    }
}
