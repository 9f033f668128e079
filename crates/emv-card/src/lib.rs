//! EMV Card - APDU handling and contactless card access
//!
//! This crate provides the APDU types exchanged with a contactless card, the
//! driver interface the payment flow uses to control the RF field, and the
//! bounded card re-presentment loop. A PC/SC backed driver is available with
//! the `pcsc` feature.

pub mod apdu;
pub mod driver;
pub mod presentment;
#[cfg(feature = "pcsc")]
pub mod reader;

pub use apdu::{commands, send_apdu, ApduCommand, ApduResponse};
pub use driver::{CardTechnology, ContactlessDriver, DriverError};
pub use presentment::{
    stop_card, wait_for_card, CancelProbe, Presentment, PresentmentPolicy, PresentmentPrompts,
};
#[cfg(feature = "pcsc")]
pub use reader::PcscDriver;
