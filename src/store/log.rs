//! Size-bounded, offset-addressed append log.
//!
//! Every byte ever appended gets a logical offset. When the store has a
//! maximum size, the oldest bytes are evicted to make room and the offset of
//! the first retained byte (`base_offset`) moves forward. Readers page through
//! the log by passing the `next` offset of one read as the `offset` of the
//! following one.
//!
//! # Example
//!
//! ```
//! use oob_probe::store::LogStore;
//!
//! let store = LogStore::new(10);
//! store.append(b"abcde");
//! store.append(b"fghij");
//! store.append(b"K");
//!
//! let window = store.read(0, 5);
//! assert!(window.truncated);
//! assert_eq!(window.data, b"bcdef");
//! assert_eq!(window.next, 6);
//! assert_eq!(window.total, 11);
//! ```

use std::collections::VecDeque;
use std::sync::Mutex;

/// Result of a [`LogStore::read`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogWindow {
    /// Copy of the bytes in the requested window.
    pub data: Vec<u8>,
    /// Offset to pass to the next read to continue after this window.
    pub next: u64,
    /// Total number of bytes ever retained (`base_offset + len`).
    pub total: u64,
    /// True when the requested offset had already been evicted and the read
    /// was served from the earliest retained byte instead.
    pub truncated: bool,
}

struct Inner {
    buf: VecDeque<u8>,
    base_offset: u64,
}

/// Bounded append-only byte log.
pub struct LogStore {
    inner: Mutex<Inner>,
    /// Maximum retained bytes. 0 = unbounded.
    max_size: usize,
}

impl LogStore {
    /// Create a store that retains at most `max_size` bytes (0 = unbounded).
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: VecDeque::new(),
                base_offset: 0,
            }),
            max_size,
        }
    }

    /// Create a store with no size bound.
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Maximum retained bytes (0 = unbounded).
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Append a chunk, evicting from the front if the bound is exceeded.
    ///
    /// A chunk longer than the bound keeps only its trailing `max_size`
    /// bytes: the most recent data wins.
    pub fn append(&self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }

        let chunk = if self.max_size > 0 && chunk.len() > self.max_size {
            &chunk[chunk.len() - self.max_size..]
        } else {
            chunk
        };

        let mut inner = self.inner.lock().unwrap();
        inner.buf.extend(chunk.iter().copied());

        if self.max_size > 0 && inner.buf.len() > self.max_size {
            let over = inner.buf.len() - self.max_size;
            inner.buf.drain(..over);
            inner.base_offset += over as u64;
        }
    }

    /// Read up to `limit` bytes starting at the logical `offset`.
    ///
    /// `limit == 0` reads to the end of the retained data. Offsets before the
    /// retained range are clamped to `base_offset` and flagged as truncated.
    /// Offsets past the end return an empty window with `next == offset`.
    pub fn read(&self, offset: u64, limit: usize) -> LogWindow {
        let inner = self.inner.lock().unwrap();
        let len = inner.buf.len();
        let total = inner.base_offset + len as u64;

        let mut offset = offset;
        let mut truncated = false;
        if offset < inner.base_offset {
            offset = inner.base_offset;
            truncated = true;
        }

        let start = offset - inner.base_offset;
        if start > len as u64 {
            return LogWindow {
                data: Vec::new(),
                next: offset,
                total,
                truncated,
            };
        }
        let start = start as usize;

        let end = if limit == 0 {
            len
        } else {
            start.saturating_add(limit).min(len)
        };

        let data: Vec<u8> = inner.buf.range(start..end).copied().collect();

        LogWindow {
            data,
            next: inner.base_offset + end as u64,
            total,
            truncated,
        }
    }

    /// Total bytes retained over the store's lifetime (`base_offset + len`).
    pub fn total_len(&self) -> u64 {
        let inner = self.inner.lock().unwrap();
        inner.base_offset + inner.buf.len() as u64
    }

    /// Logical offset of the first retained byte.
    pub fn base_offset(&self) -> u64 {
        self.inner.lock().unwrap().base_offset
    }

    /// Number of bytes currently retained.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().buf.len()
    }

    /// Whether the store currently retains no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogStore {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl std::fmt::Debug for LogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("LogStore")
            .field("len", &inner.buf.len())
            .field("base_offset", &inner.base_offset)
            .field("max_size", &self.max_size)
            .finish()
    }
}
