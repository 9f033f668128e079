//! PC/SC card reader driver
//!
//! Maps the contactless driver operations onto a PC/SC reader. The reader
//! manages its own RF field, so opening and closing the field only tracks
//! state and drops the card connection.

use std::ffi::{CStr, CString};
use std::time::Duration;

use pcsc::{Card, Context, Disposition, Protocols, ReaderState, Scope, ShareMode, State, MAX_BUFFER_SIZE};
use tracing::debug;

use crate::driver::{CardTechnology, ContactlessDriver, DriverError};

/// Contactless driver backed by the first PC/SC reader
pub struct PcscDriver {
    context: Context,
    reader: CString,
    card: Option<Card>,
    field_open: bool,
}

impl PcscDriver {
    /// Establish a PC/SC context and bind to the first available reader
    pub fn new() -> Result<Self, DriverError> {
        let context = Context::establish(Scope::User).map_err(|_| DriverError::NoReader)?;

        let mut readers_buf = [0; 2048];
        let reader = context
            .list_readers(&mut readers_buf)
            .map_err(|_| DriverError::NoReader)?
            .next()
            .map(CStr::to_owned)
            .ok_or(DriverError::NoReader)?;

        debug!(reader = %reader.to_string_lossy(), "Using PC/SC reader");
        Ok(Self {
            context,
            reader,
            card: None,
            field_open: false,
        })
    }

    /// Name of the bound reader
    pub fn reader_name(&self) -> String {
        self.reader.to_string_lossy().into_owned()
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<String>, DriverError> {
        let mut readers_buf = [0; 2048];
        let readers = self
            .context
            .list_readers(&mut readers_buf)
            .map_err(|_| DriverError::NoReader)?;

        Ok(readers
            .map(|r| r.to_str().unwrap_or("Unknown").to_string())
            .collect())
    }

    /// Wait until the reader reports `wanted`, or `timeout` elapses
    fn wait_for_state(&self, wanted: State, timeout: Option<Duration>) -> Result<bool, DriverError> {
        let mut states = [ReaderState::new(self.reader.clone(), State::UNAWARE)];

        // The first call returns the current state immediately
        self.context
            .get_status_change(Duration::ZERO, &mut states)
            .map_err(|e| DriverError::Transmission(e.to_string()))?;
        if states[0].event_state().contains(wanted) {
            return Ok(true);
        }

        loop {
            states[0].sync_current_state();
            match self.context.get_status_change(timeout, &mut states) {
                Ok(()) => {
                    if states[0].event_state().contains(wanted) {
                        return Ok(true);
                    }
                }
                Err(pcsc::Error::Timeout) => return Ok(false),
                Err(e) => return Err(DriverError::Transmission(e.to_string())),
            }
        }
    }
}

impl ContactlessDriver for PcscDriver {
    fn open_field(&mut self) -> Result<(), DriverError> {
        self.field_open = true;
        Ok(())
    }

    fn close_field(&mut self) {
        self.card = None;
        self.field_open = false;
    }

    fn is_field_open(&self) -> bool {
        self.field_open
    }

    fn detect_card(&mut self, _technology: CardTechnology, timeout: Duration) -> Result<(), DriverError> {
        if !self.field_open {
            return Err(DriverError::FieldUnavailable("field closed".to_string()));
        }
        if self.wait_for_state(State::PRESENT, Some(timeout))? {
            Ok(())
        } else {
            Err(DriverError::NoCard)
        }
    }

    fn activate_card(&mut self) -> Result<(), DriverError> {
        let card = self
            .context
            .connect(&self.reader, ShareMode::Shared, Protocols::ANY)
            .map_err(|e| DriverError::Activation(e.to_string()))?;
        self.card = Some(card);
        Ok(())
    }

    fn exchange_apdu(&mut self, command: &[u8]) -> Result<Vec<u8>, DriverError> {
        let card = self.card.as_ref().ok_or(DriverError::NoCard)?;
        let mut rapdu_buf = [0; MAX_BUFFER_SIZE];
        let rapdu = card
            .transmit(command, &mut rapdu_buf)
            .map_err(|e| DriverError::Transmission(e.to_string()))?;
        Ok(rapdu.to_vec())
    }

    fn deselect(&mut self, wait_removal: bool) -> Result<(), DriverError> {
        if let Some(card) = self.card.take() {
            card.disconnect(Disposition::LeaveCard)
                .map_err(|(_, e)| DriverError::Deselect(e.to_string()))?;
        }
        if wait_removal {
            self.wait_for_state(State::EMPTY, None)?;
        }
        Ok(())
    }
}
