//! Thread identity tokens.
//!
//! Handles are confined to the thread that opened them. Instead of asking
//! the OS who is calling, every entry point takes the caller's
//! [`ThreadToken`] and compares it against the token captured at open.
//! Tests can stand in for another thread with [`ThreadToken::simulated`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: ThreadToken = ThreadToken::next();
}

/// Opaque identity of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadToken(u64);

impl ThreadToken {
    fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the token of the calling OS thread.
    ///
    /// The same thread always gets the same token.
    #[must_use]
    pub fn current() -> Self {
        CURRENT.with(|token| *token)
    }

    /// Mints a token that belongs to no OS thread.
    ///
    /// Useful for exercising thread confinement from a single test thread.
    #[must_use]
    pub fn simulated() -> Self {
        Self::next()
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread#{}", self.0)
    }
}
