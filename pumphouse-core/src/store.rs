//! Bounded per-category record store with flash overflow
//!
//! ## Overview
//!
//! One [`RecordStore`] exists per telemetry category. It is the only
//! stateful stage between producers and the delivery scheduler, and it is
//! the part of the pipeline that has to survive both broker outages and
//! power loss:
//!
//! ```text
//! producers ──push──► [ in-memory LIFO buffer, capacity C ]
//!                        │ full on push?
//!                        ▼
//!                     whole buffer → one batch file on flash
//!
//! scheduler ◄─pop_and_stash── buffer (reloads one batch file when empty)
//! ```
//!
//! ## Delivery semantics
//!
//! - **LIFO within a generation**: pops return the most recently pushed
//!   record first. When the buffer runs dry, one flash batch is reloaded
//!   and pops continue LIFO through that generation. Delivery is
//!   freshness-biased, not globally chronological; that is a deliberate
//!   flash-write-amplification tradeoff (one write per C records).
//! - **Stash**: the popped record is retained until the caller confirms
//!   delivery with [`RecordStore::discard`]. Until then, every
//!   `pop_and_stash` returns the same record again, making retry after a
//!   failed or unacknowledged send idempotent.
//! - **Bounded memory over durability**: if the overflow write fails, the
//!   buffer is reset anyway and that generation is lost. Telemetry must
//!   never grow without bound or block pump control because flash is
//!   unavailable.
//!
//! ## Locking
//!
//! All fields live behind one mutex per store. The lock is held across the
//! flash write/reload calls; that is a latency hazard for producers during
//! an overflow, not a correctness one.

use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};

use crate::flash::Flash;
use crate::record::{Category, Record, RECORD_LEN};

/// Highest batch file id; ids wrap back to 0 past this
const MAX_FILE_ID: u32 = 9999;

struct StoreInner {
    /// LIFO buffer, `len() <= capacity`, never reallocated past capacity
    buf: Vec<Record>,
    /// Popped-but-unconfirmed record; `Some` blocks fresh pops
    stash: Option<Record>,
    /// Id used for the next batch file, wrapping
    next_file_id: u32,
}

/// Fixed-capacity record store for one telemetry category
pub struct RecordStore {
    category: Category,
    capacity: usize,
    dir: String,
    flash: Arc<dyn Flash>,
    inner: Mutex<StoreInner>,
}

impl RecordStore {
    /// Create the store and its batch directory
    ///
    /// `capacity` is fixed for the life of the store. A failed mkdir is
    /// logged, not fatal: the store still works in memory and batch writes
    /// will fail individually with bounded loss.
    pub fn new(
        category: Category,
        capacity: usize,
        data_dir: &str,
        flash: Arc<dyn Flash>,
    ) -> Self {
        let dir = format!(
            "{}/{}",
            data_dir.trim_end_matches('/'),
            category.dir_name()
        );
        if let Err(e) = flash.mkdir_if_absent(&dir) {
            warn!("{}: cannot create batch directory: {e}", category.dir_name());
        }
        debug!(
            "{}: store initialized, capacity {capacity}",
            category.dir_name()
        );
        Self {
            category,
            capacity,
            dir,
            flash,
            inner: Mutex::new(StoreInner {
                buf: Vec::with_capacity(capacity),
                stash: None,
                next_file_id: 0,
            }),
        }
    }

    /// Category this store holds
    pub fn category(&self) -> Category {
        self.category
    }

    /// Fixed in-memory capacity, also the batch file record count
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records currently buffered in memory
    pub fn len(&self) -> usize {
        self.lock().buf.len()
    }

    /// Whether the in-memory buffer is empty (flash batches may remain)
    pub fn is_empty(&self) -> bool {
        self.lock().buf.is_empty()
    }

    /// Append a record, overflowing a full buffer to flash first
    ///
    /// Callable from any producer context. When the buffer already holds
    /// `capacity` records the whole generation is written to a new batch
    /// file and the buffer reset before the new record is accepted; the
    /// reset happens even if the write fails.
    pub fn push(&self, record: Record) {
        let mut inner = self.lock();
        if inner.buf.len() >= self.capacity {
            self.overflow_to_flash(&mut inner);
        }
        inner.buf.push(record);
    }

    /// Pop the next record for delivery, keeping it stashed
    ///
    /// Returns the stashed record again if one is pending, so a retry after
    /// a failed send redelivers the identical record. On an empty buffer a
    /// single batch reload from flash is attempted before giving up.
    pub fn pop_and_stash(&self) -> Option<Record> {
        let mut inner = self.lock();
        if let Some(stashed) = inner.stash {
            return Some(stashed);
        }
        if inner.buf.is_empty() {
            self.reload_from_flash(&mut inner);
        }
        let record = inner.buf.pop()?;
        inner.stash = Some(record);
        Some(record)
    }

    /// Keep the stashed record for redelivery
    ///
    /// Called after a failed send or a transport disconnect. The stash
    /// already holds the record, so the next `pop_and_stash` returns it
    /// again; this only documents the hand-back in the log.
    pub fn restore(&self) {
        let inner = self.lock();
        match inner.stash {
            Some(_) => debug!("{}: stashed record held for retry", self.category.dir_name()),
            None => debug!("{}: restore with nothing stashed", self.category.dir_name()),
        }
    }

    /// Drop the stashed record after confirmed delivery
    pub fn discard(&self) {
        self.lock().stash = None;
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        // A poisoned lock means a panic elsewhere; the data is still
        // consistent enough for best-effort telemetry.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Write the full buffer to a new batch file and reset it
    ///
    /// The buffer is cleared even when the write fails: bounded memory is
    /// worth more than that generation of samples.
    fn overflow_to_flash(&self, inner: &mut StoreInner) {
        let path = self.next_batch_path(inner);
        let mut bytes = Vec::with_capacity(inner.buf.len() * RECORD_LEN);
        for record in &inner.buf {
            bytes.extend_from_slice(&record.encode());
        }
        match self.flash.write_exact(&path, &bytes) {
            Ok(()) => info!(
                "{}: {} records written to {path}",
                self.category.dir_name(),
                inner.buf.len()
            ),
            Err(e) => warn!(
                "{}: batch write to {path} failed, dropping {} records: {e}",
                self.category.dir_name(),
                inner.buf.len()
            ),
        }
        inner.buf.clear();
    }

    /// Pick the next free batch file path, probing past ids still on flash
    fn next_batch_path(&self, inner: &mut StoreInner) -> String {
        let existing = self.flash.list_entries(&self.dir).unwrap_or_default();
        let mut name = Self::batch_name(Self::bump_file_id(inner));
        for _ in 0..MAX_FILE_ID {
            if !existing.iter().any(|n| n == &name) {
                break;
            }
            name = Self::batch_name(Self::bump_file_id(inner));
        }
        format!("{}/{}", self.dir, name)
    }

    fn bump_file_id(inner: &mut StoreInner) -> u32 {
        inner.next_file_id += 1;
        if inner.next_file_id > MAX_FILE_ID {
            inner.next_file_id = 0;
        }
        inner.next_file_id
    }

    fn batch_name(id: u32) -> String {
        format!("{id:04}.bin")
    }

    /// Load one batch file into the empty buffer and delete it
    ///
    /// Entries are tried in directory order; which of several queued
    /// batches loads first is unspecified. A file that cannot be read or
    /// decoded is skipped (and left in place) and the next one is tried.
    fn reload_from_flash(&self, inner: &mut StoreInner) {
        let entries = match self.flash.list_entries(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("{}: cannot scan batch directory: {e}", self.category.dir_name());
                return;
            }
        };

        let mut bytes = vec![0u8; self.capacity * RECORD_LEN];
        for name in entries {
            if !name.ends_with(".bin") {
                continue;
            }
            let path = format!("{}/{}", self.dir, name);
            if let Err(e) = self.flash.read_exact(&path, &mut bytes) {
                debug!("{}: skipping unreadable batch {path}: {e}", self.category.dir_name());
                continue;
            }
            let Some(records) = self.decode_batch(&bytes) else {
                warn!("{}: skipping corrupt batch {path}", self.category.dir_name());
                continue;
            };
            inner.buf = records;
            if let Err(e) = self.flash.remove(&path) {
                // Leaving the file behind risks duplicate delivery later,
                // never loss.
                warn!("{}: cannot remove loaded batch {path}: {e}", self.category.dir_name());
            }
            debug!(
                "{}: reloaded {} records from {path}",
                self.category.dir_name(),
                inner.buf.len()
            );
            return;
        }
    }

    fn decode_batch(&self, bytes: &[u8]) -> Option<Vec<Record>> {
        let mut records = Vec::with_capacity(self.capacity);
        for chunk in bytes.chunks_exact(RECORD_LEN) {
            let array: &[u8; RECORD_LEN] = chunk.try_into().ok()?;
            let record = Record::decode(array).ok()?;
            if record.category() != self.category {
                return None;
            }
            records.push(record);
        }
        Some(records)
    }
}
