//! AID related parameter adjustment
//!
//! Before the kernel runs, the Terminal Transaction Qualifiers of the
//! selected AID are reconciled with the entry point result and the amount.

use emv_common::{bcd_to_u64, tags, ExchangeBuffer};
use tracing::{debug, warn};

/// Amount used to check a qVSDC card's status (one currency unit)
pub const STATUS_CHECK_AMOUNT: u64 = 100;

// TTQ byte 1
const TTQ_MSD_SUPPORTED: u8 = 0x80;
const TTQ_QVSDC_SUPPORTED: u8 = 0x20;
const TTQ_CONTACTLESS_MODES: u8 = !(TTQ_MSD_SUPPORTED | TTQ_QVSDC_SUPPORTED);

// TTQ byte 2
const TTQ_ONLINE_CRYPTOGRAM_REQUIRED: u8 = 0x80;
const TTQ_CVM_REQUIRED: u8 = 0x40;

// AID options byte 1
const AID_OPTION_ZERO_AMOUNT_ALLOWED: u8 = 0x04;
const AID_OPTION_STATUS_CHECK_ALLOWED: u8 = 0x02;

/// What [`adjust_aid_parameters`] changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AidAdjustment {
    /// A TTQ was rewritten
    pub ttq_adjusted: bool,
    /// The "qVSDC not allowed" record was appended to the AID parameters
    pub qvsdc_not_allowed: bool,
    /// The amount reached the contactless transaction limit
    pub amount_over_limit: bool,
}

/// Reconcile the AID TTQ with the entry point TTQ and the amount
///
/// Both buffers must carry a TTQ of at least two bytes, otherwise nothing
/// changes. Missing optional parameters stop the adjustment where they are
/// needed; earlier changes are kept.
pub fn adjust_aid_parameters(
    entry_point: &mut ExchangeBuffer,
    aid_parameters: &mut ExchangeBuffer,
    amount: u64,
) -> AidAdjustment {
    let mut result = AidAdjustment::default();

    let Some(ep_ttq) = entry_point
        .find(tags::TERMINAL_TRANSACTION_QUALIFIERS)
        .filter(|ttq| ttq.len() >= 2)
        .map(<[u8]>::to_vec)
    else {
        return result;
    };
    let Some(aid_ttq) = aid_parameters
        .find(tags::TERMINAL_TRANSACTION_QUALIFIERS)
        .filter(|ttq| ttq.len() >= 2)
        .map(<[u8]>::to_vec)
    else {
        return result;
    };

    if aid_ttq[0] & TTQ_QVSDC_SUPPORTED != 0 {
        let mut ttq = aid_ttq;
        ttq[1] &= !(TTQ_ONLINE_CRYPTOGRAM_REQUIRED | TTQ_CVM_REQUIRED);
        ttq[1] |= ep_ttq[1] & (TTQ_ONLINE_CRYPTOGRAM_REQUIRED | TTQ_CVM_REQUIRED);
        write_ttq(aid_parameters, &ttq);
        result.ttq_adjusted = true;

        let options = aid_parameters
            .find(tags::AID_OPTIONS)
            .and_then(|v| v.first().copied());

        match amount {
            0 => {
                let Some(options) = options else {
                    return result;
                };
                if options & AID_OPTION_ZERO_AMOUNT_ALLOWED == 0 {
                    ttq[0] &= TTQ_CONTACTLESS_MODES;
                    ttq[1] &= !TTQ_ONLINE_CRYPTOGRAM_REQUIRED;
                    write_ttq(aid_parameters, &ttq);
                    result.qvsdc_not_allowed = mark_qvsdc_not_allowed(aid_parameters);
                } else if aid_parameters
                    .find(tags::ZERO_CHECK_DEACTIVATED)
                    .and_then(|v| v.first())
                    .is_some_and(|b| *b != 0)
                {
                    ttq[1] &= !TTQ_ONLINE_CRYPTOGRAM_REQUIRED;
                    write_ttq(aid_parameters, &ttq);
                }
            }
            STATUS_CHECK_AMOUNT => {
                if options.is_some_and(|o| o & AID_OPTION_STATUS_CHECK_ALLOWED != 0) {
                    ttq[1] |= TTQ_ONLINE_CRYPTOGRAM_REQUIRED;
                    write_ttq(aid_parameters, &ttq);
                }
            }
            _ => {
                let Some(limit) = aid_parameters
                    .find(tags::CLESS_TRANSACTION_LIMIT)
                    .and_then(bcd_to_u64)
                else {
                    return result;
                };
                if amount >= limit && options.is_some() {
                    debug!(amount, limit, "Amount at or above contactless limit");
                    result.amount_over_limit = true;
                    ttq[0] &= TTQ_CONTACTLESS_MODES;
                    write_ttq(aid_parameters, &ttq);
                    result.qvsdc_not_allowed = mark_qvsdc_not_allowed(aid_parameters);
                }
            }
        }
    } else if aid_ttq[0] & TTQ_MSD_SUPPORTED != 0 {
        let mut ttq = ep_ttq;
        ttq[1] &= !TTQ_ONLINE_CRYPTOGRAM_REQUIRED;
        ttq[1] |= aid_ttq[1] & TTQ_ONLINE_CRYPTOGRAM_REQUIRED;
        write_ttq(entry_point, &ttq);
        result.ttq_adjusted = true;
    }

    result
}

fn write_ttq(buffer: &mut ExchangeBuffer, ttq: &[u8]) {
    if let Some(value) = buffer.find_mut(tags::TERMINAL_TRANSACTION_QUALIFIERS) {
        value.copy_from_slice(ttq);
    }
}

fn mark_qvsdc_not_allowed(aid_parameters: &mut ExchangeBuffer) -> bool {
    match aid_parameters.add_tag(tags::PAYWAVE_QVSDC_NOT_ALLOWED, &[0x01]) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Unable to add qVSDC not allowed");
            false
        }
    }
}
