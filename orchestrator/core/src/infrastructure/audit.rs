// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Audit Sinks
//
// - TracingAuditSink: structured log line per entry (default)
// - InMemoryAuditSink: bounded ring, for tests and the CLI report
// - JsonLinesAuditSink: append-only file, one JSON object per line, written
//   by a background task fed through a bounded queue

use anyhow::Context;
use metrics::counter;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::audit::{AuditEntry, AuditSink};

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append(&self, entry: &AuditEntry) {
        info!(
            target: "warden::audit",
            sequence = entry.sequence,
            kind = %entry.kind,
            "audit"
        );
    }
}

pub struct InMemoryAuditSink {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl InMemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
        }
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn kinds(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.kind.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn append(&self, entry: &AuditEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
    }
}

/// `append` only enqueues; entries that find the queue full are counted and
/// dropped. Nothing reaches the file until [`JsonLinesAuditSink::start`].
pub struct JsonLinesAuditSink {
    path: PathBuf,
    sender: mpsc::Sender<AuditEntry>,
    pending: Mutex<Option<(mpsc::Receiver<AuditEntry>, File)>>,
    dropped: AtomicU64,
}

impl JsonLinesAuditSink {
    pub fn open(path: impl AsRef<Path>, queue_capacity: usize) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create audit directory {:?}", parent))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open audit log {:?}", path))?;
        info!("Appending audit trail to {:?}", path);
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        Ok(Self {
            path,
            sender,
            pending: Mutex::new(Some((receiver, file))),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries lost to a full or closed queue.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Spawn the writer. Once `shutdown` fires it writes what is already
    /// queued, flushes and exits. `None` if it was already started.
    pub fn start(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        let (receiver, file) = self.pending.lock().take()?;
        let path = self.path.clone();
        Some(tokio::spawn(write_entries(path, receiver, file, shutdown)))
    }
}

impl AuditSink for JsonLinesAuditSink {
    fn append(&self, entry: &AuditEntry) {
        let rejected = match self.sender.try_send(entry.clone()) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Full(entry)) => entry,
            Err(mpsc::error::TrySendError::Closed(entry)) => entry,
        };
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        counter!("warden_audit_entries_dropped_total").increment(1);
        if dropped == 1 || dropped % 1000 == 0 {
            warn!(
                path = ?self.path,
                sequence = rejected.sequence,
                dropped,
                "Audit queue full, dropping entries"
            );
        }
    }
}

async fn write_entries(
    path: PathBuf,
    mut receiver: mpsc::Receiver<AuditEntry>,
    file: File,
    shutdown: CancellationToken,
) {
    let mut writer = BufWriter::new(tokio::fs::File::from_std(file));
    let mut closing = false;
    let mut written = 0u64;
    loop {
        let next = if closing {
            receiver.recv().await
        } else {
            let next = tokio::select! {
                next = receiver.recv() => Some(next),
                _ = shutdown.cancelled() => None,
            };
            match next {
                Some(next) => next,
                None => {
                    closing = true;
                    receiver.close();
                    continue;
                }
            }
        };
        let Some(entry) = next else {
            break;
        };

        write_line(&mut writer, &entry, &path).await;
        written += 1;
        while let Ok(entry) = receiver.try_recv() {
            write_line(&mut writer, &entry, &path).await;
            written += 1;
        }
        if let Err(e) = writer.flush().await {
            warn!(path = ?path, "Failed to flush audit log: {}", e);
        }
    }
    if let Err(e) = writer.flush().await {
        warn!(path = ?path, "Failed to flush audit log: {}", e);
    }
    debug!(path = ?path, written, "Audit writer stopped");
}

async fn write_line(writer: &mut BufWriter<tokio::fs::File>, entry: &AuditEntry, path: &Path) {
    let mut line = match serde_json::to_string(entry) {
        Ok(line) => line,
        Err(e) => {
            warn!(sequence = entry.sequence, "Failed to serialize audit entry: {}", e);
            return;
        }
    };
    line.push('\n');
    if let Err(e) = writer.write_all(line.as_bytes()).await {
        warn!(path = ?path, "Failed to write audit entry: {}", e);
    }
}

/// Fans one entry out to several sinks.
#[derive(Default)]
pub struct CompositeAuditSink {
    sinks: Vec<std::sync::Arc<dyn AuditSink>>,
}

impl CompositeAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: std::sync::Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl AuditSink for CompositeAuditSink {
    fn append(&self, entry: &AuditEntry) {
        for sink in &self.sinks {
            sink.append(entry);
        }
    }
}
