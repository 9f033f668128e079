//! Card re-presentment
//!
//! After an online authorisation the card has usually left the field. To
//! deliver issuer scripts the terminal asks the cardholder to tap again and
//! re-selects the application that was used for the transaction.

use std::time::Duration;

use tracing::{debug, warn};

use crate::apdu::send_apdu;
use crate::driver::{CardTechnology, ContactlessDriver};

/// Bounds of the re-presentment wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentmentPolicy {
    /// Detection attempts shared by the whole wait
    pub max_cycles: u32,
    /// Timeout of a single detection attempt
    pub detect_timeout: Duration,
}

impl Default for PresentmentPolicy {
    fn default() -> Self {
        Self {
            max_cycles: 20,
            detect_timeout: Duration::from_secs(1),
        }
    }
}

/// Result of [`wait_for_card`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentment {
    /// A card answered the final select with 9000
    Found,
    /// The cycle budget ran out or the driver failed
    NotFound,
    /// The merchant pressed cancel
    Cancelled,
}

impl Presentment {
    pub fn is_found(self) -> bool {
        self == Presentment::Found
    }
}

/// Cardholder prompts shown during the wait
pub trait PresentmentPrompts {
    fn represent_card(&self);
    fn remove_card(&self);
}

/// Cancel key check made between detection attempts
pub trait CancelProbe {
    fn cancel_requested(&self) -> bool;
}

impl<F: Fn() -> bool> CancelProbe for F {
    fn cancel_requested(&self) -> bool {
        self()
    }
}

/// Wait for the card that was used for the transaction
///
/// The field is restarted, then up to `policy.max_cycles` detection attempts
/// are made. A detected card is activated and sent `select_command`. A card
/// that does not answer 9000 is asked to leave and the wait continues within
/// the same cycle budget.
///
/// # Arguments
/// * `driver` - Contactless driver
/// * `select_command` - The final select command sent during the transaction
/// * `prompts` - Remove/represent card prompts
/// * `cancel` - Cancel key probe, checked after each failed detection
/// * `policy` - Cycle budget and detection timeout
pub fn wait_for_card(
    driver: &mut dyn ContactlessDriver,
    select_command: &[u8],
    prompts: &dyn PresentmentPrompts,
    cancel: &dyn CancelProbe,
    policy: PresentmentPolicy,
) -> Presentment {
    let mut cycles = 0u32;

    loop {
        // Restart the field so the card gets a fresh power-up
        driver.close_field();
        if let Err(e) = driver.open_field() {
            warn!(error = %e, "Unable to open contactless field");
            return Presentment::NotFound;
        }

        let mut detected = false;
        while !detected && cycles < policy.max_cycles {
            match driver.detect_card(CardTechnology::TYPE_AB, policy.detect_timeout) {
                Ok(()) => detected = true,
                Err(_) if cancel.cancel_requested() => {
                    debug!("Card presentment cancelled");
                    return Presentment::Cancelled;
                }
                Err(_) => {
                    if cycles == 0 {
                        prompts.represent_card();
                    }
                }
            }
            cycles += 1;
        }

        if !detected {
            debug!(cycles, "No card presented");
            return Presentment::NotFound;
        }

        if let Err(e) = driver.activate_card() {
            debug!(error = %e, "Card activation failed, retrying");
            if cycles < policy.max_cycles {
                continue;
            }
            return Presentment::NotFound;
        }

        let response = match send_apdu(driver, select_command) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Final select failed");
                return Presentment::NotFound;
            }
        };

        if response.is_success() {
            debug!(cycles, "Appropriate card presented");
            return Presentment::Found;
        }

        debug!(sw = %response.status_string(), "Wrong card presented");
        prompts.remove_card();
        if let Err(e) = driver.deselect(true) {
            warn!(error = %e, "Card deselection failed");
            return Presentment::NotFound;
        }
        prompts.represent_card();

        if cycles >= policy.max_cycles {
            return Presentment::NotFound;
        }
    }
}

/// Deselect the card without waiting for removal and close the field
pub fn stop_card(driver: &mut dyn ContactlessDriver) {
    if let Err(e) = driver.deselect(false) {
        debug!(error = %e, "Deselect before closing field failed");
    }
    driver.close_field();
}
