//! Shared Transfer Buffer and its lock
//!
//! One 16-byte buffer is shared by every link worker. The only way in is a
//! [`BufferGuard`] from [`BufferLock`]; dropping the guard clears the buffer
//! and then releases the lock, so a worker can never leave stale bytes
//! behind for the next holder.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::types::{KeyEvent, Payload, PAYLOAD_LEN};

// ============================================================================
// Transfer Buffer
// ============================================================================

/// Fixed-size transfer buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferBuffer {
    bytes: Payload,
}

impl TransferBuffer {
    /// All-zero buffer
    pub const fn new() -> Self {
        Self {
            bytes: [0; PAYLOAD_LEN],
        }
    }

    /// Stage a key as the first byte of an otherwise empty message
    pub fn stage_key(&mut self, key: KeyEvent) {
        self.clear();
        self.bytes[0] = key.code();
    }

    /// Copy `data` in from the start (truncated to capacity), zeroing the rest
    pub fn stage(&mut self, data: &[u8]) -> usize {
        self.clear();
        let len = data.len().min(PAYLOAD_LEN);
        self.bytes[..len].copy_from_slice(&data[..len]);
        len
    }

    /// Fill from a received frame
    pub fn fill(&mut self, frame: &[u8]) -> usize {
        self.stage(frame)
    }

    /// First `len` bytes (clamped to capacity)
    pub fn frame(&self, len: usize) -> &[u8] {
        &self.bytes[..len.min(PAYLOAD_LEN)]
    }

    /// First byte
    pub fn first(&self) -> u8 {
        self.bytes[0]
    }

    /// Whole buffer
    pub fn as_bytes(&self) -> &Payload {
        &self.bytes
    }

    /// Zero the buffer
    pub fn clear(&mut self) {
        self.bytes = [0; PAYLOAD_LEN];
    }

    /// True when every byte is zero
    pub fn is_clear(&self) -> bool {
        self.bytes.iter().all(|b| *b == 0)
    }
}

// ============================================================================
// Buffer Lock
// ============================================================================

/// Lock bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockStats {
    /// Successful acquisitions
    pub acquisitions: u64,
    /// Releases (guard drops)
    pub releases: u64,
}

impl LockStats {
    /// True when acquisitions and releases pair up (at most one holder)
    pub fn balanced(&self) -> bool {
        let outstanding = self.acquisitions.wrapping_sub(self.releases);
        outstanding <= 1
    }
}

#[derive(Debug, Default)]
struct Counters {
    acquisitions: AtomicU64,
    releases: AtomicU64,
    held: AtomicBool,
}

/// Binary lock over the transfer buffer (initially available)
#[derive(Debug, Clone)]
pub struct BufferLock {
    buffer: Arc<Mutex<TransferBuffer>>,
    counters: Arc<Counters>,
}

impl BufferLock {
    /// Create an available lock over an all-zero buffer
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(Mutex::new(TransferBuffer::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Wait (unbounded) for the buffer
    pub async fn acquire(&self) -> BufferGuard<'_> {
        let guard = self.buffer.lock().await;
        self.on_acquired(guard)
    }

    /// Take the buffer if nobody holds it
    pub fn try_acquire(&self) -> Option<BufferGuard<'_>> {
        self.buffer.try_lock().ok().map(|guard| self.on_acquired(guard))
    }

    /// Acquisition / release counters
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquisitions: self.counters.acquisitions.load(Ordering::SeqCst),
            releases: self.counters.releases.load(Ordering::SeqCst),
        }
    }

    /// True while some worker holds the guard
    pub fn is_held(&self) -> bool {
        self.counters.held.load(Ordering::SeqCst)
    }

    fn on_acquired<'a>(&'a self, guard: MutexGuard<'a, TransferBuffer>) -> BufferGuard<'a> {
        let was_held = self.counters.held.swap(true, Ordering::SeqCst);
        debug_assert!(!was_held, "transfer buffer acquired twice");
        self.counters.acquisitions.fetch_add(1, Ordering::SeqCst);
        BufferGuard {
            guard,
            counters: &self.counters,
        }
    }
}

impl Default for BufferLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to the transfer buffer
///
/// Dropping the guard clears the buffer, then releases the lock.
pub struct BufferGuard<'a> {
    guard: MutexGuard<'a, TransferBuffer>,
    counters: &'a Counters,
}

impl Deref for BufferGuard<'_> {
    type Target = TransferBuffer;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for BufferGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for BufferGuard<'_> {
    fn drop(&mut self) {
        self.guard.clear();
        self.counters.held.store(false, Ordering::SeqCst);
        self.counters.releases.fetch_add(1, Ordering::SeqCst);
        // MutexGuard field drops after this, releasing the lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_key() {
        let mut buf = TransferBuffer::new();
        buf.stage_key(KeyEvent::Two);
        assert_eq!(buf.first(), 3);
        assert_eq!(buf.frame(8), &[3, 0, 0, 0, 0, 0, 0, 0]);
        assert!(!buf.is_clear());
        buf.clear();
        assert!(buf.is_clear());
    }

    #[test]
    fn test_stage_truncates() {
        let mut buf = TransferBuffer::new();
        let copied = buf.stage(&[7u8; 40]);
        assert_eq!(copied, PAYLOAD_LEN);
        assert_eq!(buf.frame(100).len(), PAYLOAD_LEN);
    }

    #[test]
    fn test_guard_clears_on_release() {
        let lock = BufferLock::new();
        {
            let mut guard = lock.try_acquire().unwrap();
            guard.stage(b"hello");
            assert!(lock.is_held());
            assert!(lock.try_acquire().is_none());
        }
        assert!(!lock.is_held());

        let guard = lock.try_acquire().unwrap();
        assert!(guard.is_clear());
        drop(guard);

        let stats = lock.stats();
        assert_eq!(stats.acquisitions, 2);
        assert_eq!(stats.releases, 2);
        assert!(stats.balanced());
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let lock = BufferLock::new();
        let other = lock.clone();

        let guard = lock.acquire().await;
        let waiter = tokio::spawn(async move {
            let guard = other.acquire().await;
            guard.is_clear()
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);

        assert!(waiter.await.unwrap());
        assert_eq!(lock.stats().releases, 2);
    }
}
