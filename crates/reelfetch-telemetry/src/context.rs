//! Context propagation helpers for application spans.
//!
//! # Design
//! - Provides an application-level span guard so every log line carries the
//!   running command and build info.

use tracing::{Span, span::Entered};

use crate::init::build_sha;

/// Guard that keeps the application-level span entered for the lifetime of the process.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    #[must_use]
    /// Enter the application-level tracing span for the lifetime of the guard.
    pub fn new(command: impl Into<String>) -> Self {
        let command = command.into();
        let span: &'static Span = Box::leak(Box::new(tracing::info_span!(
            "app",
            command = %command,
            build_sha = %build_sha(),
            restored = tracing::field::Empty
        )));
        let guard = span.enter();
        Self { _guard: guard }
    }
}

/// Record how many sessions were restored on the active application span.
pub fn record_restored(count: usize) {
    Span::current().record("restored", count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_context_guard_records_restore_count() {
        let guard = GlobalContextGuard::new("resume");
        record_restored(2);
        drop(guard);
    }
}
