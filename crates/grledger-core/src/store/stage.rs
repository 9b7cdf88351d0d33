//! Stage-result transaction.

use super::batch::Batch;
use super::{Operation, UpsertResult};
use crate::error::{LedgerError, Result};
use crate::lifecycle::{next_state, validate_transition};
use crate::model::{MAX_STAGE_ATTEMPTS, PipelineRow};
use crate::stage_result::StageResult;
use log::debug;

impl Batch<'_> {
    /// Records one stage attempt for `key` and moves its lifecycle state.
    ///
    /// The attempt cap is checked before anything else is touched. All
    /// changes happen on a copy of the pipeline row, which is only staged
    /// once the transition has been validated.
    pub(super) fn apply_stage_result(
        &mut self,
        key: &str,
        result: &StageResult,
    ) -> Result<UpsertResult> {
        let key = key.trim();
        let (partition, identity) = self
            .identity
            .find(key)
            .ok_or_else(|| self.identity.missing(key))?;
        let created_at = identity.created_at_utc;

        if let Some(from) = self.pipeline.excluded(key) {
            return Err(LedgerError::RepartitionUnsupported {
                key: key.to_string(),
                from,
                to: partition,
            });
        }
        let mut row = match self.pipeline.find(key) {
            Some((from, _)) if from != partition => {
                return Err(LedgerError::RepartitionUnsupported {
                    key: key.to_string(),
                    from,
                    to: partition,
                });
            }
            Some((_, row)) => row.clone(),
            None => PipelineRow::new(key, created_at),
        };

        let stage = result.stage;
        let attempts = row.attempts(stage);
        if attempts >= MAX_STAGE_ATTEMPTS {
            return Err(LedgerError::RetryLimitExceeded {
                key: key.to_string(),
                stage,
            });
        }
        *row.attempts_mut(stage) = attempts + 1;

        row.record_outcome(result, self.now);

        let has_wayback_url = result
            .has_wayback_url
            .unwrap_or_else(|| row.has_wayback_url());
        let next = next_state(row.state, stage, result.outcome(has_wayback_url));
        validate_transition(key, row.state, next)?;

        debug!(
            "{} {} attempt {}: {} -> {}",
            key,
            stage,
            attempts + 1,
            row.state,
            next
        );
        row.state = next;
        row.updated_at_utc = self.now;
        self.pipeline.put(partition, row)?;

        Ok(UpsertResult {
            operation: Operation::Updated,
            partition,
            key: key.to_string(),
        })
    }
}
