//! Contactless driver interface
//!
//! The payment flow never talks to the reader hardware directly. It goes
//! through [`ContactlessDriver`], which a terminal platform, the PC/SC
//! backend or a test double implements.

use std::ops::BitOr;
use std::time::Duration;

use thiserror::Error;

/// Errors reported by a contactless driver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error("no reader available")]
    NoReader,
    #[error("no card detected")]
    NoCard,
    #[error("contactless field could not be opened: {0}")]
    FieldUnavailable(String),
    #[error("card activation failed: {0}")]
    Activation(String),
    #[error("APDU transmission failed: {0}")]
    Transmission(String),
    #[error("card response too short ({len} bytes)")]
    ShortResponse { len: usize },
    #[error("card deselection failed: {0}")]
    Deselect(String),
}

/// Card technology mask used for detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardTechnology(u8);

impl CardTechnology {
    pub const TYPE_A: CardTechnology = CardTechnology(0x01);
    pub const TYPE_B: CardTechnology = CardTechnology(0x02);
    /// ISO 14443 type A or B
    pub const TYPE_AB: CardTechnology = CardTechnology(0x03);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: CardTechnology) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CardTechnology {
    type Output = CardTechnology;

    fn bitor(self, rhs: Self) -> Self::Output {
        CardTechnology(self.0 | rhs.0)
    }
}

/// Contactless reader operations used by the payment flow
pub trait ContactlessDriver: Send {
    /// Power the RF field
    fn open_field(&mut self) -> Result<(), DriverError>;

    /// Power the RF field down; a closed field is not an error
    fn close_field(&mut self);

    fn is_field_open(&self) -> bool;

    /// Block up to `timeout` waiting for one card of the given technology
    fn detect_card(
        &mut self,
        technology: CardTechnology,
        timeout: Duration,
    ) -> Result<(), DriverError>;

    /// Bring the detected card to the ISO 14443-4 protocol layer
    fn activate_card(&mut self) -> Result<(), DriverError>;

    /// Send a command APDU and return the raw response including the status word
    fn exchange_apdu(&mut self, command: &[u8]) -> Result<Vec<u8>, DriverError>;

    /// Deselect the card, optionally blocking until it leaves the field
    fn deselect(&mut self, wait_removal: bool) -> Result<(), DriverError>;
}

impl<D: ContactlessDriver + ?Sized> ContactlessDriver for Box<D> {
    fn open_field(&mut self) -> Result<(), DriverError> {
        (**self).open_field()
    }

    fn close_field(&mut self) {
        (**self).close_field()
    }

    fn is_field_open(&self) -> bool {
        (**self).is_field_open()
    }

    fn detect_card(
        &mut self,
        technology: CardTechnology,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        (**self).detect_card(technology, timeout)
    }

    fn activate_card(&mut self) -> Result<(), DriverError> {
        (**self).activate_card()
    }

    fn exchange_apdu(&mut self, command: &[u8]) -> Result<Vec<u8>, DriverError> {
        (**self).exchange_apdu(command)
    }

    fn deselect(&mut self, wait_removal: bool) -> Result<(), DriverError> {
        (**self).deselect(wait_removal)
    }
}
