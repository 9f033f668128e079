//! Transaction dispositions and the report handed back to the orchestrator

use crate::kernel::KernelStatus;
use crate::scripts::ScriptOutcome;
use crate::services::InterruptSource;

/// What the orchestrator does next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transaction finished, successfully or not
    End,
    /// Start the contactless transaction again
    Restart,
    /// Start again on the contact interfaces only
    RestartWithoutContactless,
    /// Start again and expect the phone to be tapped a second time
    RestartDoubleTap,
    /// Remove the current AID from the candidate list and retry
    RemoveAid,
}

impl Disposition {
    /// The field is left as is for the next attempt
    pub fn leaves_field_state(self) -> bool {
        matches!(
            self,
            Disposition::RemoveAid
                | Disposition::RestartWithoutContactless
                | Disposition::RestartDoubleTap
        )
    }

    /// The attempt counts as a transaction: sequence counter and batch
    pub fn is_final(self) -> bool {
        !matches!(self, Disposition::Restart | Disposition::RemoveAid)
    }
}

/// Financial result of a finished transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approved { online: bool },
    Declined { online: bool },
    Interrupted(InterruptSource),
    Error,
}

/// Why online PIN entry did not produce a PIN block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinFailure {
    MissingPan,
    MissingAmount,
    Cancelled,
    EntryFailed,
    /// The PIN block did not fit in the transaction buffer
    Storage,
}

/// Everything the decision flow concluded about one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReport {
    pub disposition: Disposition,
    pub decision: Option<Decision>,
    /// Kernel status after PIN and refund adjustments
    pub kernel_status: KernelStatus,
    pub interruption: Option<InterruptSource>,
    pub pin_failure: Option<PinFailure>,
    pub online_authorisation_attempted: bool,
    pub scripts: Option<ScriptOutcome>,
    /// Deny list verdict from the black-list step
    pub black_listed: Option<bool>,
    /// The transaction was marked for the batch
    pub marked_for_batch: bool,
    /// The batch accepted the transaction
    pub batch_recorded: bool,
    pub sequence_counter_incremented: bool,
}

impl TransactionReport {
    pub fn new(kernel_status: KernelStatus) -> Self {
        Self {
            disposition: Disposition::End,
            decision: None,
            kernel_status,
            interruption: None,
            pin_failure: None,
            online_authorisation_attempted: false,
            scripts: None,
            black_listed: None,
            marked_for_batch: false,
            batch_recorded: false,
            sequence_counter_incremented: false,
        }
    }

    pub fn scripts_executed(&self) -> bool {
        self.scripts.is_some_and(ScriptOutcome::executed)
    }
}
