//! Property tests for the shared transfer buffer
//!
//! Tests lock invariants for:
//! - Pairing: every acquisition is released exactly once
//! - Exclusion: never two holders
//! - Hygiene: the buffer reads all zero after every release

use std::time::Duration;

use modearb_core::buffer::*;
use modearb_core::types::*;
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

fn message() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..40)
}

fn key() -> impl Strategy<Value = KeyEvent> {
    prop::sample::select(KeyEvent::PRESSED.to_vec())
}

// ============================================================================
// Lock Property Tests
// ============================================================================

proptest! {
    /// CORE INVARIANT: release always clears, acquisitions pair with releases
    #[test]
    fn release_clears_and_pairs(messages in prop::collection::vec(message(), 1..30)) {
        let lock = BufferLock::new();
        for msg in &messages {
            let mut guard = lock.try_acquire().unwrap();
            prop_assert!(guard.is_clear());
            let staged = guard.stage(msg);
            prop_assert_eq!(staged, msg.len().min(PAYLOAD_LEN));
            prop_assert!(lock.try_acquire().is_none());
            prop_assert!(lock.stats().balanced());
            drop(guard);
            prop_assert!(!lock.is_held());
        }

        let stats = lock.stats();
        prop_assert_eq!(stats.acquisitions, messages.len() as u64);
        prop_assert_eq!(stats.releases, messages.len() as u64);
    }

    /// Staged keys produce a frame of the link's length with the key first
    #[test]
    fn staged_key_frames(k in key()) {
        let mut buf = TransferBuffer::new();
        buf.stage_key(k);
        for link in LinkKind::ALL {
            let frame = buf.frame(link.frame_len());
            prop_assert_eq!(frame.len(), link.frame_len());
            prop_assert_eq!(frame[0], k.code());
            prop_assert!(frame[1..].iter().all(|b| *b == 0));
        }
    }

    /// Contending workers never overlap and never see stale bytes
    #[test]
    fn contended_holders_never_overlap(
        messages in prop::collection::vec(message(), 2..8),
        holds in prop::collection::vec(0u64..5, 2..8),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        let stats = rt.block_on(async {
            let lock = BufferLock::new();
            let mut workers = Vec::new();
            for (msg, hold) in messages.iter().cloned().zip(holds.iter().copied()) {
                let lock = lock.clone();
                workers.push(tokio::spawn(async move {
                    let mut guard = lock.acquire().await;
                    let clean = guard.is_clear();
                    guard.stage(&msg);
                    tokio::time::sleep(Duration::from_millis(hold)).await;
                    clean
                }));
            }
            let mut all_clean = true;
            for worker in workers {
                all_clean &= worker.await.unwrap();
            }
            let final_clear = lock.try_acquire().map(|g| g.is_clear());
            (all_clean, lock.stats(), final_clear)
        });

        let (all_clean, lock_stats, final_clear) = stats;
        prop_assert!(all_clean);
        prop_assert_eq!(lock_stats.acquisitions, lock_stats.releases);
        prop_assert_eq!(final_clear, Some(true));
    }
}
