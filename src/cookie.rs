//! Cooperative cancellation handle

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Cancellation and progress handle polled by the content interpreter.
///
/// The cleaner only forwards a cookie; it never inspects or changes it. A
/// cookie may be shared with another thread (e.g. behind an `Arc`) that calls
/// [`Cookie::abort`] to stop a long-running clean.
#[derive(Debug, Default)]
pub struct Cookie {
    abort: AtomicBool,
    progress: AtomicUsize,
}

impl Cookie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that interpretation stop at the next operator
    pub fn abort(&self) {
        self.abort.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Number of content stream operators interpreted so far
    pub fn progress(&self) -> usize {
        self.progress.load(Ordering::Relaxed)
    }

    pub(crate) fn advance(&self) {
        self.progress.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_and_progress() {
        let cookie = Cookie::new();
        assert!(!cookie.is_aborted());
        cookie.advance();
        cookie.advance();
        assert_eq!(cookie.progress(), 2);
        cookie.abort();
        assert!(cookie.is_aborted());
    }
}
