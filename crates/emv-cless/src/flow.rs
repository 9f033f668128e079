//! payWave specific data added to the transaction buffer
//!
//! Tells the kernel where to stop (nowhere), which steps to call back for,
//! and which languages the terminal can display.

use emv_common::{tags, ExchangeBuffer, ExchangeError};

use crate::config::TerminalConfig;
use crate::customise::CustomisationStep;

/// Size of the step bitfields
pub const STEP_BITFIELD_LEN: usize = 8;

/// Bitfield of kernel steps; step `n` is bit `n % 8` of byte
/// `STEP_BITFIELD_LEN - 1 - n / 8`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepSet([u8; STEP_BITFIELD_LEN]);

impl StepSet {
    /// Read the bitfield at the start of a customisation record
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes
            .get(..STEP_BITFIELD_LEN)
            .and_then(|b| b.try_into().ok())
            .map(StepSet)
    }

    pub fn insert(&mut self, step: CustomisationStep) {
        let id = usize::from(step.id());
        if let Some(byte) = (STEP_BITFIELD_LEN - 1).checked_sub(id / 8) {
            self.0[byte] |= 1 << (id % 8);
        }
    }

    pub fn contains(&self, step: CustomisationStep) -> bool {
        let id = usize::from(step.id());
        (STEP_BITFIELD_LEN - 1)
            .checked_sub(id / 8)
            .is_some_and(|byte| self.0[byte] & (1 << (id % 8)) != 0)
    }

    pub fn as_bytes(&self) -> &[u8; STEP_BITFIELD_LEN] {
        &self.0
    }
}

/// Payment flow customisation record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowCustomisation {
    pub steps: StepSet,
    pub application_type: u16,
    pub service_id: u16,
}

impl FlowCustomisation {
    /// Steps the terminal customises; the black-list step only when a deny
    /// list is configured
    pub fn for_terminal(config: &TerminalConfig, black_list_present: bool) -> Self {
        let mut steps = StepSet::default();
        steps.insert(CustomisationStep::MsdRemoveCard);
        steps.insert(CustomisationStep::QvsdcRemoveCard);
        steps.insert(CustomisationStep::QvsdcGetCertificate);
        if black_list_present {
            steps.insert(CustomisationStep::QvsdcBlackListControl);
        }

        Self {
            steps,
            application_type: config.application_type,
            service_id: config.customisation_service_id,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(STEP_BITFIELD_LEN + 4);
        out.extend_from_slice(self.steps.as_bytes());
        out.extend_from_slice(&self.application_type.to_be_bytes());
        out.extend_from_slice(&self.service_id.to_be_bytes());
        out
    }
}

/// Append the payWave specific data to the transaction buffer
///
/// The records are staged first, so the buffer is left untouched when they
/// do not all fit.
pub fn add_paywave_specific_data(
    buffer: &mut ExchangeBuffer,
    config: &TerminalConfig,
    black_list_present: bool,
) -> Result<(), ExchangeError> {
    let mut staged = ExchangeBuffer::with_capacity(buffer.remaining())?;

    // No stop during the payment flow
    staged.add_tag(tags::KERNEL_PAYMENT_FLOW_STOP, &[0u8; STEP_BITFIELD_LEN])?;

    let custom = FlowCustomisation::for_terminal(config, black_list_present);
    staged.add_tag(tags::KERNEL_PAYMENT_FLOW_CUSTOM, &custom.encode())?;

    staged.add_tag(
        tags::KERNEL_TERMINAL_SUPPORTED_LANGUAGES,
        &config.supported_languages_bytes(),
    )?;

    for (tag, value) in staged.records() {
        buffer.add_tag(tag, value)?;
    }
    Ok(())
}
