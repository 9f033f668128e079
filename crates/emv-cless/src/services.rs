//! Terminal services used by the decision flow
//!
//! Display, PIN pad, host link, batch file and the contact readers belong to
//! the terminal platform. They are reached through these narrow traits.

use std::time::Duration;

use emv_common::ExchangeBuffer;

use crate::error::{BatchError, HostError};
use crate::runner::CancelToken;

/// Source of an external interruption of the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptSource {
    /// Cancel key on the keyboard
    Keyboard,
    /// A chip card was inserted
    ChipCard,
    /// A card was swiped
    Swipe,
    /// The orchestrator asked the transaction to stop
    UserEvent,
    Unspecified,
}

/// Messages the flow asks the display to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Approved { online: bool, with_available_amount: bool },
    Declined { online: bool },
    AvailableAmount(Option<u64>),
    SignatureRequired,
    SignatureAccepted,
    SignatureRejected,
    OnlineProcessing,
    PinCancelled,
    PinError,
    PhoneInstructions,
    /// Kernel finished without a usable result
    StatusError,
    /// Generic transaction error
    TransactionError,
    Interrupted(InterruptSource),
    BatchError,
}

/// Yes/no questions put to the merchant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Question {
    SignatureOk,
    PrintTransactionLog,
}

/// Merchant and cardholder interface
pub trait Ihm: Send + Sync {
    fn notify(&self, notice: Notice);

    /// Ask the cardholder to remove the card
    fn remove_card_sequence(&self);

    /// Ask the cardholder to present the card again
    fn represent_card_sequence(&self);

    fn ask(&self, question: Question) -> bool;
}

/// Online PIN request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinRequest<'a> {
    /// PAN used to build the PIN block
    pub pan: &'a [u8],
    /// Amount shown on the PIN pad, minor units
    pub amount: u64,
    pub first_key_timeout: Duration,
    pub inter_key_timeout: Duration,
    /// Cardholder language, two letters
    pub language: Option<[u8; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
    /// Enciphered PIN block
    Entered(Vec<u8>),
    Cancelled,
    Failed,
}

pub trait PinEntry: Send + Sync {
    fn online_pin(&self, request: &PinRequest<'_>) -> PinOutcome;
}

/// Online authorisation
pub trait OnlineHost: Send + Sync {
    /// Send the transaction to the host; the response tags (authorisation
    /// response code, issuer data, scripts) are appended to `buffer`
    fn authorise(&self, buffer: &mut ExchangeBuffer) -> Result<(), HostError>;
}

/// Transaction batch
pub trait Batch: Send + Sync {
    fn add_transaction(&self, buffer: &ExchangeBuffer) -> Result<(), BatchError>;
    fn increment_sequence_counter(&self);
}

/// Contact transactions started when the kernel was interrupted by a card
pub trait ContactFallback: Send + Sync {
    fn chip_transaction(&self, amount: u64, currency_code: u16) -> bool;
    fn swipe_transaction(&self, amount: u64, currency_code: u16) -> bool;
}

/// Peripheral event that interrupts a running kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeripheralEvent {
    CancelKey,
    ChipInserted,
    CardSwiped,
    /// The orchestrator asked the running transaction to stop
    StopRequested,
}

impl PeripheralEvent {
    pub fn source(self) -> InterruptSource {
        match self {
            PeripheralEvent::CancelKey => InterruptSource::Keyboard,
            PeripheralEvent::ChipInserted => InterruptSource::ChipCard,
            PeripheralEvent::CardSwiped => InterruptSource::Swipe,
            PeripheralEvent::StopRequested => InterruptSource::UserEvent,
        }
    }
}

/// Keyboard, chip and swipe readers watched while the kernel runs
pub trait PeripheralScanner: Send + Sync {
    /// Event already pending before the kernel starts
    fn latched(&self) -> Option<PeripheralEvent>;

    /// Block until a qualifying event arrives or `cancel` is triggered
    ///
    /// Implementations poll `cancel` often enough to return promptly.
    fn wait(&self, cancel: &CancelToken) -> Option<PeripheralEvent>;
}
