//! Message id generation.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Generate a process-unique ASCII message id.
///
/// Eight random bytes in hex, a hyphen, then an eight-byte monotonic counter
/// in hex. The random half keeps ids from colliding across processes, the
/// counter keeps them unique within one. Relaxed ordering is enough since
/// only uniqueness matters, not ordering between threads.
pub fn message_id() -> String {
    let noise: [u8; 8] = rand::random();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);

    let mut id = String::with_capacity(33);
    for byte in noise {
        let _ = write!(id, "{byte:02x}");
    }
    id.push('-');
    let _ = write!(id, "{seq:016x}");
    id
}
