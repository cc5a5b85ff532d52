// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page scheduler: runs page work on a bounded pool and hands results on in
// page order.
//
// One task per page waits for a pool permit, runs the page processor and
// reports back over a channel. The scheduler owns the job state, decides on
// retries and keeps the failure budget. Results are released through a
// reorder buffer so that page k is never handed on before pages 1..k-1.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ocrwerk_core::{JobConfig, OcrwerkError, PageDecision, PageFailure, PageFailureKind, PageResult, PageUnitDescriptor};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use crate::cancel::CancelFlag;
use crate::job_state::{JobState, TransitionError};
use crate::retry::{RetryConfig, RetryDecision, should_retry};
use crate::worker::PageProcessor;

/// Pool size, failure budget and retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub workers: usize,
    /// Page failures converted to pass-through before the job is aborted.
    pub max_page_failures: usize,
    pub retry: RetryConfig,
}

impl From<&JobConfig> for SchedulerConfig {
    fn from(config: &JobConfig) -> Self {
        Self {
            workers: config.worker_count(),
            max_page_failures: config.max_page_failures,
            retry: RetryConfig::from(&config.retry),
        }
    }
}

/// Everything the scheduler produced for a job that ran to completion.
#[derive(Debug)]
pub struct ScheduleOutcome {
    /// One result per page, in page order.
    pub results: Vec<PageResult>,
    /// Failures that were tolerated; their pages are passed through.
    pub tolerated: Vec<PageFailure>,
    /// Number of retries dispatched.
    pub retries: u32,
}

/// Holds finished results until every earlier page has finished too.
#[derive(Debug)]
pub struct ReorderBuffer {
    order: Vec<u32>,
    next: usize,
    held: HashMap<u32, PageResult>,
    released: Vec<PageResult>,
}

impl ReorderBuffer {
    /// `order` lists the pages in output order.
    pub fn new(order: Vec<u32>) -> Self {
        Self {
            released: Vec::with_capacity(order.len()),
            order,
            next: 0,
            held: HashMap::new(),
        }
    }

    /// Accept a result and return how many results became releasable.
    pub fn insert(&mut self, result: PageResult) -> usize {
        self.held.insert(result.page, result);
        let before = self.released.len();
        while let Some(page) = self.order.get(self.next) {
            let Some(result) = self.held.remove(page) else {
                break;
            };
            self.released.push(result);
            self.next += 1;
        }
        self.released.len() - before
    }

    /// Results released so far, in page order.
    pub fn released(&self) -> &[PageResult] {
        &self.released
    }

    pub fn is_complete(&self) -> bool {
        self.next == self.order.len()
    }

    pub fn into_results(self) -> Vec<PageResult> {
        self.released
    }
}

enum Event {
    Started {
        page: u32,
        attempt: u32,
    },
    Finished {
        page: u32,
        attempt: u32,
        outcome: Result<PageResult, PageFailure>,
    },
    /// The task ended without running (cancelled or halted).
    Skipped,
}

/// Shared handles every page task carries.
#[derive(Clone)]
struct Dispatch {
    processor: Arc<dyn PageProcessor>,
    permits: Arc<Semaphore>,
    halt: Arc<AtomicBool>,
    cancel: CancelFlag,
    events: mpsc::UnboundedSender<Event>,
}

impl Dispatch {
    fn spawn(&self, tasks: &mut JoinSet<()>, descriptor: PageUnitDescriptor, attempt: u32, delay: Option<Duration>) {
        tasks.spawn(self.clone().run_page(descriptor, attempt, delay));
    }

    fn send(&self, event: Event) {
        // The receiver outlives every task unless the scheduler bailed out.
        let _ = self.events.send(event);
    }

    async fn run_page(self, descriptor: PageUnitDescriptor, attempt: u32, delay: Option<Duration>) {
        let page = descriptor.index();
        if let Some(delay) = delay {
            tokio::select! {
                _ = self.cancel.cancelled() => return self.send(Event::Skipped),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let permit = tokio::select! {
            _ = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.permits).acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            return self.send(Event::Skipped);
        };
        if self.cancel.is_cancelled() || self.halt.load(Ordering::SeqCst) {
            return self.send(Event::Skipped);
        }

        self.send(Event::Started { page, attempt });
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(PageFailure::new(page, PageFailureKind::Cancelled, "job cancelled")),
            result = self.processor.process(&descriptor, attempt, &self.cancel) => result,
        };
        self.send(Event::Finished { page, attempt, outcome });
    }
}

pub struct Scheduler {
    processor: Arc<dyn PageProcessor>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(processor: Arc<dyn PageProcessor>, config: SchedulerConfig) -> Self {
        Self { processor, config }
    }

    /// Process every page. Fails with the first failure beyond the budget,
    /// or with `Cancelled`; in both cases no results are handed on.
    #[instrument(skip_all, fields(pages = descriptors.len(), workers = self.config.workers))]
    pub async fn run(
        &self,
        descriptors: Vec<PageUnitDescriptor>,
        cancel: &CancelFlag,
    ) -> Result<ScheduleOutcome, OcrwerkError> {
        let total = descriptors.len();
        let workers = self.config.workers.max(1);
        let (events, mut inbox) = mpsc::unbounded_channel();
        let dispatch = Dispatch {
            processor: Arc::clone(&self.processor),
            permits: Arc::new(Semaphore::new(workers)),
            halt: Arc::new(AtomicBool::new(false)),
            cancel: cancel.clone(),
            events,
        };

        let mut state = JobState::new(descriptors.iter().map(PageUnitDescriptor::index), workers);
        let mut reorder = ReorderBuffer::new(descriptors.iter().map(PageUnitDescriptor::index).collect());
        let by_page: HashMap<u32, PageUnitDescriptor> = descriptors.iter().map(|d| (d.index(), d.clone())).collect();

        let mut tasks = JoinSet::new();
        for descriptor in descriptors {
            dispatch.spawn(&mut tasks, descriptor, 0, None);
        }
        let mut outstanding = total;
        let mut tolerated: Vec<PageFailure> = Vec::new();
        let mut escalated: Option<PageFailure> = None;
        let mut retries = 0;

        info!(total, workers, "page processing started");
        while outstanding > 0 {
            let event = tokio::select! {
                Some(event) = inbox.recv() => event,
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = joined
                        && err.is_panic()
                    {
                        return Err(OcrwerkError::Other(format!("page task panicked: {err}")));
                    }
                    continue;
                }
                else => break,
            };

            let (page, attempt, outcome) = match event {
                Event::Started { page, attempt } => {
                    state.start(page, attempt).map_err(internal)?;
                    continue;
                }
                Event::Skipped => {
                    outstanding -= 1;
                    continue;
                }
                Event::Finished { page, attempt, outcome } => {
                    outstanding -= 1;
                    (page, attempt, outcome)
                }
            };

            let failure = match outcome {
                Ok(result) => {
                    state.finish(page, result.decision).map_err(internal)?;
                    if reorder.insert(result) > 0 {
                        let done = reorder.released().len();
                        info!(page, done, total, "pages ready");
                    }
                    continue;
                }
                Err(failure) => failure,
            };

            if failure.kind == PageFailureKind::Cancelled || cancel.is_cancelled() {
                state.fail(page, PageFailureKind::Cancelled).map_err(internal)?;
                continue;
            }

            let decision = if escalated.is_some() {
                RetryDecision::GiveUp
            } else {
                should_retry(&failure, attempt, &self.config.retry)
            };
            if let RetryDecision::RetryAfter(delay) = decision {
                state.requeue(page).map_err(internal)?;
                if let Some(descriptor) = by_page.get(&page) {
                    warn!(page, attempt, error = %failure, "page failed; retrying");
                    dispatch.spawn(&mut tasks, descriptor.clone(), attempt + 1, Some(delay));
                    outstanding += 1;
                    retries += 1;
                }
                continue;
            }

            state.fail(page, failure.kind).map_err(internal)?;
            if escalated.is_none() && tolerated.len() < self.config.max_page_failures {
                warn!(page, error = %failure, "page failure tolerated; copying the source page");
                let mut result = PageResult::pass_through(page, PageDecision::FailedTolerated, Duration::ZERO);
                result.notes.push(failure.to_string());
                tolerated.push(failure);
                reorder.insert(result);
            } else if escalated.is_none() {
                error!(page, error = %failure, "page failed; stopping dispatch");
                dispatch.halt.store(true, Ordering::SeqCst);
                escalated = Some(failure);
            } else {
                debug!(page, error = %failure, "further page failure after abort");
            }
        }

        if cancel.is_cancelled() {
            info!("page processing cancelled");
            return Err(OcrwerkError::Cancelled);
        }
        if let Some(failure) = escalated {
            return Err(failure.into());
        }
        if !state.is_complete() || !reorder.is_complete() {
            return Err(OcrwerkError::Other(format!(
                "page processing ended early: {:?}",
                state.counts()
            )));
        }

        info!(total, retries, tolerated = tolerated.len(), "page processing finished");
        Ok(ScheduleOutcome {
            results: reorder.into_results(),
            tolerated,
            retries,
        })
    }
}

fn internal(err: TransitionError) -> OcrwerkError {
    OcrwerkError::Other(format!("scheduler state error: {err}"))
}
