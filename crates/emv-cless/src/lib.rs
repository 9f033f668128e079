//! EMV Cless - Contactless post-kernel decision flow
//!
//! Drives a payWave/qPBOC kernel transaction: prepares the kernel specific
//! data, answers the kernel's customisation callbacks, runs the online PIN,
//! online authorisation and issuer script sub-protocols, and resolves the
//! kernel status into a disposition for the orchestrator.
//!
//! The kernel, the display, the PIN pad, the host link and the batch are
//! external services reached through the traits in [`kernel`] and
//! [`services`].

pub mod aid;
pub mod black_list;
pub mod config;
pub mod customise;
pub mod dump;
pub mod error;
pub mod flow;
pub mod kernel;
pub mod kernel_data;
pub mod outcome;
pub mod resolver;
pub mod runner;
pub mod scripts;
pub mod services;
pub mod session;
pub mod txn_log;

pub use aid::{adjust_aid_parameters, AidAdjustment};
pub use black_list::{BlackList, BlackListEntry, BlackListError};
pub use config::{ConfigError, ExecutionMode, TerminalConfig};
pub use customise::{dispatch, CustomisationStep, Customiser, StepContext, StepOutcome};
pub use error::{BatchError, HostError};
pub use kernel::{KernelDirective, KernelStatus, PaymentKernel, StepCustomiser};
pub use kernel_data::TransactionData;
pub use outcome::{Decision, Disposition, PinFailure, TransactionReport};
pub use resolver::{Collaborators, Resolver};
pub use runner::{CancelToken, TransactionWorker, WorkerError};
pub use scripts::{ScriptManager, ScriptOutcome};
pub use services::{
    Batch, ContactFallback, Ihm, InterruptSource, Notice, OnlineHost, PeripheralEvent,
    PeripheralScanner, PinEntry, PinOutcome, PinRequest, Question,
};
pub use session::ContactlessSession;
