//! PAN deny list

use emv_common::cn_to_digits;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sequence number used when the card does not provide one
pub const VOID_PAN_SEQUENCE_NUMBER: u8 = 0xFF;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlackListError {
    #[error("black list PAN {0:?} must be 1 to 19 decimal digits")]
    InvalidEntry(String),
    #[error("card PAN is not a valid compressed numeric value")]
    MalformedPan,
}

/// One denied card
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackListEntry {
    /// PAN as decimal digits
    pub pan: String,
    /// PAN sequence number; absent matches any card with this PAN
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u8>,
}

/// Validated deny list
#[derive(Debug, Clone, Default)]
pub struct BlackList {
    entries: Vec<BlackListEntry>,
}

impl BlackList {
    pub fn new(entries: Vec<BlackListEntry>) -> Result<Self, BlackListError> {
        if let Some(bad) = entries.iter().find(|e| !is_pan(&e.pan)) {
            return Err(BlackListError::InvalidEntry(bad.pan.clone()));
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check a card against the list
    ///
    /// # Arguments
    /// * `pan` - PAN as read from the card (compressed numeric)
    /// * `sequence_number` - PAN sequence number, or [`VOID_PAN_SEQUENCE_NUMBER`]
    ///
    /// # Returns
    /// * `Ok(true)` - The card is denied
    /// * `Ok(false)` - The card is not on the list
    /// * `Err(_)` - The PAN could not be decoded
    pub fn check(&self, pan: &[u8], sequence_number: u8) -> Result<bool, BlackListError> {
        let digits = cn_to_digits(pan)
            .filter(|d| !d.is_empty())
            .ok_or(BlackListError::MalformedPan)?;

        Ok(self.entries.iter().any(|entry| {
            entry.pan == digits
                && match entry.sequence_number {
                    None => true,
                    Some(seq) => sequence_number != VOID_PAN_SEQUENCE_NUMBER && seq == sequence_number,
                }
        }))
    }
}

fn is_pan(pan: &str) -> bool {
    (1..=19).contains(&pan.len()) && pan.bytes().all(|b| b.is_ascii_digit())
}
