//! Cross-process inter-agent messaging.
//!
//! An append-only JSON-lines file shared by every agent process, with a
//! peer lock file for advisory-lock serialization. Each instance keeps an
//! in-memory set of sequence ids it has already surfaced, so repeated
//! `check_messages` calls only return new arrivals.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::fslock::FileLock;
use crate::util::epoch_secs;

/// Recipient marker for messages addressed to every agent.
pub const BROADCAST: &str = "*";

/// One journal record. `to` is an agent id or the [`BROADCAST`] marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub from: String,
    pub to: String,
    pub content: String,
    pub timestamp: f64,
    pub seq: u64,
}

pub struct MessageJournal {
    messages_file: PathBuf,
    lock_file: PathBuf,
    read_seqs: Mutex<HashSet<u64>>,
}

impl MessageJournal {
    pub fn new(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        Ok(Self {
            messages_file: state_dir.join("messages.jsonl"),
            lock_file: state_dir.join("messages.lock"),
            read_seqs: Mutex::new(HashSet::new()),
        })
    }

    /// Append a message under the exclusive lock. Returns the assigned
    /// sequence id, which is monotonic across all writer processes.
    pub fn send(&self, from: &str, to: &str, content: &str) -> Result<u64> {
        let guard = FileLock::exclusive(&self.lock_file)?;
        let seq = self.last_seq()? + 1;
        let entry = JournalEntry {
            from: from.to_string(),
            to: to.to_string(),
            content: content.to_string(),
            timestamp: epoch_secs(),
            seq,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.messages_file)?;
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        drop(guard);

        debug!(from = %from, to = %to, seq = seq, "Journal message written");
        Ok(seq)
    }

    pub fn broadcast(&self, from: &str, content: &str) -> Result<u64> {
        self.send(from, BROADCAST, content)
    }

    /// Return unread messages for an agent: addressed to it or broadcast,
    /// not sent by it, and not previously returned by this instance. The
    /// file is re-read under a shared lock each call.
    pub fn check_messages(&self, agent_id: &str) -> Result<Vec<JournalEntry>> {
        let entries = {
            let _guard = FileLock::shared(&self.lock_file)?;
            self.read_entries()?
        };

        let mut read_seqs = self.read_seqs.lock();
        let unread: Vec<JournalEntry> = entries
            .into_iter()
            .filter(|entry| {
                (entry.to == agent_id || entry.to == BROADCAST)
                    && entry.from != agent_id
                    && !read_seqs.contains(&entry.seq)
            })
            .collect();

        for entry in &unread {
            read_seqs.insert(entry.seq);
        }
        Ok(unread)
    }

    fn read_entries(&self) -> Result<Vec<JournalEntry>> {
        if !self.messages_file.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.messages_file)?;
        let mut entries = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(line)?);
        }
        Ok(entries)
    }

    /// Highest sequence id on disk. Caller must hold the lock.
    fn last_seq(&self) -> Result<u64> {
        Ok(self
            .read_entries()?
            .iter()
            .map(|entry| entry.seq)
            .max()
            .unwrap_or(0))
    }
}
