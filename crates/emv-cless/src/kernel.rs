//! Payment kernel interface
//!
//! The EMV kernel is an external component. The decision flow drives it
//! through [`PaymentKernel`] and the kernel calls back into the terminal
//! through [`StepCustomiser`] while a transaction is running.

use emv_common::ExchangeBuffer;

/// Result of a kernel service call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelStatus {
    /// Service completed without a transaction disposition
    Ok,
    OfflineApproved,
    OfflineDeclined,
    OnlineAuthorisation,
    CommunicationError,
    UseContactInterface,
    /// Remove the current AID from the candidate list and retry
    RemoveAid,
    /// A mobile device asked the cardholder to look at the phone
    Mobile,
    InternalError,
    /// Stopped by the application after an external interruption
    Stopped,
    /// A code the flow does not know about
    Other(u16),
}

impl KernelStatus {
    pub fn is_stopped(self) -> bool {
        self == KernelStatus::Stopped
    }
}

/// What the kernel should do after a customisation callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelDirective {
    Continue,
    Stop,
}

/// Callback invoked by the kernel when it reaches a customised step
pub trait StepCustomiser: Send + Sync {
    fn customise_step(&self, buffer: &mut ExchangeBuffer, step: u8) -> KernelDirective;
}

/// Services of the contactless payment kernel
///
/// `do_transaction` blocks until the transaction completes. `cancel` may be
/// called from another thread while it runs.
pub trait PaymentKernel: Send + Sync {
    /// Run a transaction with the data in `buffer`; the kernel writes its
    /// results back into the same buffer
    fn do_transaction(
        &self,
        buffer: &mut ExchangeBuffer,
        customiser: &dyn StepCustomiser,
    ) -> KernelStatus;

    /// Deliver issuer authentication data and scripts to the card
    fn after_transaction(&self, buffer: &mut ExchangeBuffer) -> KernelStatus;

    /// Ask a running transaction to stop
    fn cancel(&self);

    /// Fill the zero-length records of `buffer` from the kernel database
    fn get_data(&self, buffer: &mut ExchangeBuffer) -> KernelStatus;

    /// Append the whole kernel database to `buffer`
    fn get_all_data(&self, buffer: &mut ExchangeBuffer) -> KernelStatus;

    /// Apply the debug settings in `buffer`
    fn debug_management(&self, buffer: &mut ExchangeBuffer) -> KernelStatus;

    /// Forget the data of the last transaction
    fn clear(&self);
}
