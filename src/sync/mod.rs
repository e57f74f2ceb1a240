// Sync state machine
// Drives one page through the ordered sync phases, accumulating progress in
// a context owned exclusively by the machine.

#[cfg(test)]
mod tests;

use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::services::Page;
use crate::{Result, SyncError};

/// Phases of a page sync. `Failed` is terminal and reachable from any
/// phase; `Completing` is the terminal success phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Initializing,
    FetchingPage,
    ProcessingProperties,
    ProcessingBlocks,
    Completing,
    Failed,
}

impl SyncPhase {
    /// 1-based position among the five live phases; 0 for `Failed`.
    fn ordinal(self) -> usize {
        match self {
            SyncPhase::Initializing => 1,
            SyncPhase::FetchingPage => 2,
            SyncPhase::ProcessingProperties => 3,
            SyncPhase::ProcessingBlocks => 4,
            SyncPhase::Completing => 5,
            SyncPhase::Failed => 0,
        }
    }
}

/// Mutable state accumulated across the phases of one sync.
///
/// Owned exclusively by its state machine; external callers observe it
/// through [`SyncStateMachine::context`] but never mutate it directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncContext {
    pub page_id: String,
    pub include_blocks: bool,
    pub include_properties: bool,
    pub namespace: String,
    pub vectors_created: usize,
    pub properties_processed: usize,
    pub blocks_processed: usize,
    pub errors: Vec<String>,
}

impl SyncContext {
    #[inline]
    pub fn new(page_id: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            page_id: page_id.into(),
            include_blocks: true,
            include_properties: true,
            namespace: namespace.into(),
            vectors_created: 0,
            properties_processed: 0,
            blocks_processed: 0,
            errors: Vec::new(),
        }
    }

    #[inline]
    pub fn with_includes(mut self, properties: bool, blocks: bool) -> Self {
        self.include_properties = properties;
        self.include_blocks = blocks;
        self
    }
}

/// Counters produced by one processing phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseOutcome {
    pub items_processed: usize,
    pub vectors_created: usize,
}

/// Position within the phase sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub current: usize,
    pub total: usize,
    pub percentage: u8,
}

/// Final summary assembled by `complete()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSummary {
    pub page_id: String,
    pub namespace: String,
    pub vectors_created: usize,
    pub properties_processed: usize,
    pub blocks_processed: usize,
    pub errors: Vec<String>,
}

/// Explicit state machine for one page sync.
///
/// Phases advance only through the methods below, in order:
/// `initialize` → `fetch_page` → `process_properties` → `process_blocks` →
/// `complete`. Any failure inside a phase moves the machine to `Failed` and
/// returns the error; `complete` stays in `Completing`.
#[derive(Debug)]
pub struct SyncStateMachine {
    phase: SyncPhase,
    context: SyncContext,
}

impl SyncStateMachine {
    #[inline]
    pub fn new(context: SyncContext) -> Self {
        Self {
            phase: SyncPhase::Initializing,
            context,
        }
    }

    #[inline]
    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    #[inline]
    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    /// Validate required identifiers and advance to `FetchingPage`.
    #[inline]
    pub fn initialize(&mut self) -> Result<()> {
        self.expect_phase(SyncPhase::Initializing)?;

        if self.context.page_id.trim().is_empty() {
            return Err(self.fail(SyncError::Validation("page id must not be empty".to_string())));
        }
        if self.context.namespace.trim().is_empty() {
            return Err(self.fail(SyncError::Validation(
                "namespace must not be empty".to_string(),
            )));
        }

        debug!("Sync initialized for page {}", self.context.page_id);
        self.phase = SyncPhase::FetchingPage;
        Ok(())
    }

    /// Fetch the page. A missing page fails the sync with a not-found
    /// error, distinct from other fetch failures so callers can 404.
    #[inline]
    pub async fn fetch_page<F, Fut>(&mut self, fetch: F) -> Result<Page>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<Page>>>,
    {
        self.expect_phase(SyncPhase::FetchingPage)?;

        match fetch().await {
            Ok(Some(page)) => {
                debug!("Fetched page {} ('{}')", page.id, page.title);
                self.phase = SyncPhase::ProcessingProperties;
                Ok(page)
            }
            Ok(None) => Err(self.fail(SyncError::NotFound(format!(
                "page {} does not exist",
                self.context.page_id
            )))),
            Err(error) => Err(self.fail(error)),
        }
    }

    /// Process page properties, or skip without invoking the closure when
    /// `include_properties` is false. When blocks are excluded the machine
    /// advances straight to `Completing`, so `ProcessingBlocks` is never
    /// observable for a properties-only sync.
    #[inline]
    pub async fn process_properties<F, Fut>(&mut self, process: F) -> Result<PhaseOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PhaseOutcome>>,
    {
        self.expect_phase(SyncPhase::ProcessingProperties)?;

        let next = if self.context.include_blocks {
            SyncPhase::ProcessingBlocks
        } else {
            SyncPhase::Completing
        };

        if !self.context.include_properties {
            debug!("Skipping property processing for page {}", self.context.page_id);
            self.phase = next;
            return Ok(PhaseOutcome::default());
        }

        match process().await {
            Ok(outcome) => {
                self.context.properties_processed += outcome.items_processed;
                self.context.vectors_created += outcome.vectors_created;
                self.phase = next;
                Ok(outcome)
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    /// Process page blocks, or skip without invoking the closure when
    /// `include_blocks` is false. In the skip case the machine is already
    /// in `Completing` and the call is a zero-count no-op, which lets
    /// callers drive every sync through the same sequence.
    #[inline]
    pub async fn process_blocks<F, Fut>(&mut self, process: F) -> Result<PhaseOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<PhaseOutcome>>,
    {
        if !self.context.include_blocks {
            self.expect_phase(SyncPhase::Completing)?;
            debug!("Skipping block processing for page {}", self.context.page_id);
            return Ok(PhaseOutcome::default());
        }

        self.expect_phase(SyncPhase::ProcessingBlocks)?;

        match process().await {
            Ok(outcome) => {
                self.context.blocks_processed += outcome.items_processed;
                self.context.vectors_created += outcome.vectors_created;
                self.phase = SyncPhase::Completing;
                Ok(outcome)
            }
            Err(error) => Err(self.fail(error)),
        }
    }

    /// Assemble the final summary. The machine stays in `Completing`; this
    /// is the terminal success phase, not a transition.
    #[inline]
    pub fn complete(&mut self) -> Result<SyncSummary> {
        self.expect_phase(SyncPhase::Completing)?;

        info!(
            "Sync complete for page {}: {} vectors, {} properties, {} blocks",
            self.context.page_id,
            self.context.vectors_created,
            self.context.properties_processed,
            self.context.blocks_processed
        );

        Ok(SyncSummary {
            page_id: self.context.page_id.clone(),
            namespace: self.context.namespace.clone(),
            vectors_created: self.context.vectors_created,
            properties_processed: self.context.properties_processed,
            blocks_processed: self.context.blocks_processed,
            errors: self.context.errors.clone(),
        })
    }

    /// Position within the five live phases; `Failed` reports zero.
    #[inline]
    pub fn progress(&self) -> SyncProgress {
        let current = self.phase.ordinal();
        let total = 5;
        SyncProgress {
            current,
            total,
            percentage: (current * 100 / total) as u8,
        }
    }

    fn expect_phase(&mut self, expected: SyncPhase) -> Result<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(self.fail(SyncError::Validation(format!(
                "sync for page {} is in phase {:?}, expected {:?}",
                self.context.page_id, self.phase, expected
            ))))
        }
    }

    /// Record the error, move to `Failed`, and hand the error back.
    fn fail(&mut self, error: SyncError) -> SyncError {
        warn!(
            "Sync for page {} failed in phase {:?}: {}",
            self.context.page_id, self.phase, error
        );
        self.context.errors.push(error.to_string());
        self.phase = SyncPhase::Failed;
        error
    }
}
