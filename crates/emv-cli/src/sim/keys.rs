//! Keyboard peripheral scanner
//!
//! Esc (or Ctrl-C) is the cancel key, `i` stands for a chip card inserted in
//! the contact reader and `s` for a card swiped through the stripe reader.
//! `q` is a stop request from the orchestrator.

use std::io;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use emv_cless::{CancelToken, PeripheralEvent, PeripheralScanner};
use tracing::{debug, warn};

/// Poll interval while waiting for a key
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Raw mode for the lifetime of the guard
struct RawMode;

impl RawMode {
    fn enable() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawMode)
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            warn!(error = %e, "Unable to restore terminal mode");
        }
    }
}

/// Map a key press to a peripheral event
pub fn peripheral_event(key: &KeyEvent) -> Option<PeripheralEvent> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Esc => Some(PeripheralEvent::CancelKey),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(PeripheralEvent::CancelKey)
        }
        KeyCode::Char('i') => Some(PeripheralEvent::ChipInserted),
        KeyCode::Char('s') => Some(PeripheralEvent::CardSwiped),
        KeyCode::Char('q') => Some(PeripheralEvent::StopRequested),
        _ => None,
    }
}

fn poll(timeout: Duration) -> io::Result<Option<PeripheralEvent>> {
    if !event::poll(timeout)? {
        return Ok(None);
    }
    match event::read()? {
        Event::Key(key) => Ok(peripheral_event(&key)),
        _ => Ok(None),
    }
}

/// Scanner reading the local keyboard
pub struct KeyScanner;

impl PeripheralScanner for KeyScanner {
    fn latched(&self) -> Option<PeripheralEvent> {
        let _raw = RawMode::enable().ok()?;
        match poll(Duration::ZERO) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "Keyboard poll failed");
                None
            }
        }
    }

    fn wait(&self, cancel: &CancelToken) -> Option<PeripheralEvent> {
        let _raw = match RawMode::enable() {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Keyboard unavailable, cancel key disabled");
                return None;
            }
        };

        while !cancel.is_cancelled() {
            match poll(POLL_INTERVAL) {
                Ok(Some(event)) => {
                    debug!(event = ?event, "Key pressed");
                    return Some(event);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Keyboard read failed");
                    return None;
                }
            }
        }
        None
    }
}
