//! Post-transaction issuer script processing
//!
//! After an approved online authorisation the host response may carry issuer
//! authentication data and issuer scripts for the card. They are staged for
//! the kernel's after-transaction service, which needs the card back in the
//! field.

use emv_card::{stop_card, wait_for_card, CancelProbe, ContactlessDriver, PresentmentPolicy, PresentmentPrompts};
use emv_common::{tags, BerTlvDecoder, ExchangeBuffer};
use tracing::{debug, info, warn};

use crate::kernel::{KernelStatus, PaymentKernel};

/// Capacity of the buffer handed to the after-transaction service
pub const STAGING_CAPACITY: usize = 256;

/// Capacity of the script collection and kernel data buffer
pub const SCRIPT_COLLECTION_CAPACITY: usize = 1040;

// TTQ byte 3 / CTQ byte 2
const TTQ_ISSUER_UPDATE_PROCESSING: u8 = 0x80;
const CTQ_ISSUER_UPDATE_PROCESSING: u8 = 0x40;

/// How the script sequence ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// No issuer authentication data and no script in the response
    NothingToDeliver,
    /// Terminal or card does not allow issuer update processing
    NotEligible,
    /// The card did not come back to the field
    CardNotPresented,
    /// Staging buffers could not be allocated
    StagingFailed,
    /// The after-transaction service ran
    Executed { status: KernelStatus },
}

impl ScriptOutcome {
    pub fn executed(self) -> bool {
        matches!(self, ScriptOutcome::Executed { .. })
    }
}

/// Everything the script sequence touches besides the response buffer
pub struct ScriptManager<'a> {
    pub kernel: &'a dyn PaymentKernel,
    pub driver: &'a mut dyn ContactlessDriver,
    pub prompts: &'a dyn PresentmentPrompts,
    pub cancel: &'a dyn CancelProbe,
    pub policy: PresentmentPolicy,
}

impl ScriptManager<'_> {
    /// Deliver issuer data and scripts found in `response` to the card
    ///
    /// The issuer script result, if the kernel produced one, is appended to
    /// `response`.
    pub fn run(&mut self, response: &mut ExchangeBuffer) -> ScriptOutcome {
        let (mut staging, mut collected) = match (
            ExchangeBuffer::with_capacity(STAGING_CAPACITY),
            ExchangeBuffer::with_capacity(SCRIPT_COLLECTION_CAPACITY),
        ) {
            (Ok(staging), Ok(collected)) => (staging, collected),
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "Unable to allocate script staging buffers");
                return ScriptOutcome::StagingFailed;
            }
        };

        // Issuer authentication data goes first
        if let Some(iad) = response.find(tags::ISSUER_AUTHENTICATION_DATA) {
            if let Err(e) = staging.add_tag(tags::ISSUER_AUTHENTICATION_DATA, iad) {
                warn!(error = %e, "Unable to stage issuer authentication data");
            }
        }

        collect_scripts(response.as_bytes(), &mut collected);

        if !collected.is_empty() {
            if let Err(e) = staging.add_tag(tags::PAYWAVE_ISSUER_SCRIPT_LIST, collected.as_bytes()) {
                warn!(error = %e, "Unable to stage issuer script list");
            }
        }

        if staging.is_empty() {
            return ScriptOutcome::NothingToDeliver;
        }

        // Reuse the collection buffer for the kernel database
        collected.clear();
        self.kernel.get_all_data(&mut collected);

        if !scripts_allowed(&collected) {
            return ScriptOutcome::NotEligible;
        }

        let select = collected
            .find(tags::FINAL_SELECT_COMMAND_SENT)
            .or_else(|| response.find(tags::FINAL_SELECT_COMMAND_SENT))
            .map(<[u8]>::to_vec);

        let outcome = match select {
            Some(select) => {
                let presented = wait_for_card(
                    &mut *self.driver,
                    &select,
                    self.prompts,
                    self.cancel,
                    self.policy,
                );
                if presented.is_found() {
                    let status = self.kernel.after_transaction(&mut staging);
                    copy_script_result(&staging, response);
                    info!(status = ?status, "Issuer scripts delivered");
                    ScriptOutcome::Executed { status }
                } else {
                    debug!(result = ?presented, "Card not presented for issuer scripts");
                    ScriptOutcome::CardNotPresented
                }
            }
            None => {
                warn!("Final select command unknown, card cannot be re-selected");
                ScriptOutcome::CardNotPresented
            }
        };

        stop_card(&mut *self.driver);
        outcome
    }
}

/// Collect every issuer script template of `region`, in order
///
/// Collection stops at the first malformed record; templates read before it
/// are kept.
pub fn collect_scripts(region: &[u8], collected: &mut ExchangeBuffer) {
    for record in BerTlvDecoder::new(region) {
        let tlv = match record {
            Ok(tlv) => tlv,
            Err(e) => {
                debug!(error = %e, "Script collection stopped");
                break;
            }
        };
        if tlv.tag == tags::ISSUER_SCRIPT_TEMPLATE_1 || tlv.tag == tags::ISSUER_SCRIPT_TEMPLATE_2 {
            if let Err(e) = collected.add_tag(tlv.tag, tlv.value) {
                warn!(tag = %tlv.tag, error = %e, "Unable to collect issuer script");
            }
        }
    }
}

/// Both terminal and card must allow issuer update processing
pub fn scripts_allowed(kernel_data: &ExchangeBuffer) -> bool {
    let terminal = kernel_data
        .find(tags::TERMINAL_TRANSACTION_QUALIFIERS)
        .and_then(|ttq| ttq.get(2))
        .is_some_and(|b| b & TTQ_ISSUER_UPDATE_PROCESSING != 0);
    if !terminal {
        debug!("TTQ does not allow issuer update processing");
        return false;
    }

    let card = kernel_data
        .find(tags::CARD_TRANSACTION_QUALIFIERS)
        .and_then(|ctq| ctq.get(1))
        .is_some_and(|b| b & CTQ_ISSUER_UPDATE_PROCESSING != 0);
    if !card {
        debug!("CTQ does not allow issuer update processing");
        return false;
    }
    true
}

fn copy_script_result(service_output: &ExchangeBuffer, response: &mut ExchangeBuffer) {
    if let Some(result) = service_output.find(tags::PAYWAVE_ISSUER_SCRIPT_RESULT) {
        if let Err(e) = response.add_tag(tags::PAYWAVE_ISSUER_SCRIPT_RESULT, result) {
            warn!(error = %e, "Unable to return issuer script result");
        }
    }
}
