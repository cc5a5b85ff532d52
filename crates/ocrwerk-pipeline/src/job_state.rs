// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-page lifecycle bookkeeping for one job.
//
// Every page moves Pending -> Running -> Done | Failed. The only edge back is
// Running -> Pending, taken when a transient failure is requeued for retry.
// At most `limit` pages are Running at any time.

use std::collections::BTreeMap;
use std::fmt;

use ocrwerk_core::{PageDecision, PageFailureKind};
use thiserror::Error;
use tracing::debug;

/// Lifecycle state of one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Pending,
    /// Running its `attempt`-th try (0-based).
    Running { attempt: u32 },
    Done(PageDecision),
    Failed(PageFailureKind),
}

impl PageState {
    fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running { .. } => "running",
            Self::Done(_) => "done",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_))
    }
}

impl fmt::Display for PageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A transition the state machine refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("page {0} is not part of this job")]
    UnknownPage(u32),

    #[error("page {page}: illegal transition {from} -> {to}")]
    Illegal {
        page: u32,
        from: &'static str,
        to: &'static str,
    },

    #[error("page {page} would exceed the limit of {limit} running pages")]
    OverLimit { page: u32, limit: usize },
}

/// Snapshot of how many pages sit in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct JobState {
    pages: BTreeMap<u32, PageState>,
    running: usize,
    limit: usize,
}

impl JobState {
    /// All `pages` start Pending; at most `limit` may run at once.
    pub fn new(pages: impl IntoIterator<Item = u32>, limit: usize) -> Self {
        Self {
            pages: pages.into_iter().map(|p| (p, PageState::Pending)).collect(),
            running: 0,
            limit: limit.max(1),
        }
    }

    pub fn state(&self, page: u32) -> Option<PageState> {
        self.pages.get(&page).copied()
    }

    pub fn running(&self) -> usize {
        self.running
    }

    /// Pending -> Running.
    pub fn start(&mut self, page: u32, attempt: u32) -> Result<(), TransitionError> {
        let current = self.current(page)?;
        if current != PageState::Pending {
            return Err(illegal(page, current, "running"));
        }
        if self.running >= self.limit {
            return Err(TransitionError::OverLimit { page, limit: self.limit });
        }
        self.set(page, PageState::Running { attempt });
        self.running += 1;
        Ok(())
    }

    /// Running -> Pending, for a retry.
    pub fn requeue(&mut self, page: u32) -> Result<(), TransitionError> {
        self.leave_running(page, "pending")?;
        self.set(page, PageState::Pending);
        Ok(())
    }

    /// Running -> Done.
    pub fn finish(&mut self, page: u32, decision: PageDecision) -> Result<(), TransitionError> {
        self.leave_running(page, "done")?;
        self.set(page, PageState::Done(decision));
        Ok(())
    }

    /// Running -> Failed.
    pub fn fail(&mut self, page: u32, kind: PageFailureKind) -> Result<(), TransitionError> {
        self.leave_running(page, "failed")?;
        self.set(page, PageState::Failed(kind));
        Ok(())
    }

    /// Whether every page has reached Done or Failed.
    pub fn is_complete(&self) -> bool {
        self.pages.values().all(PageState::is_terminal)
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for state in self.pages.values() {
            match state {
                PageState::Pending => counts.pending += 1,
                PageState::Running { .. } => counts.running += 1,
                PageState::Done(_) => counts.done += 1,
                PageState::Failed(_) => counts.failed += 1,
            }
        }
        counts
    }

    fn current(&self, page: u32) -> Result<PageState, TransitionError> {
        self.state(page).ok_or(TransitionError::UnknownPage(page))
    }

    fn leave_running(&mut self, page: u32, to: &'static str) -> Result<(), TransitionError> {
        let current = self.current(page)?;
        if !matches!(current, PageState::Running { .. }) {
            return Err(illegal(page, current, to));
        }
        self.running -= 1;
        Ok(())
    }

    fn set(&mut self, page: u32, state: PageState) {
        debug!(page, state = %state, running = self.running, "page state changed");
        self.pages.insert(page, state);
    }
}

fn illegal(page: u32, from: PageState, to: &'static str) -> TransitionError {
    TransitionError::Illegal {
        page,
        from: from.label(),
        to,
    }
}
