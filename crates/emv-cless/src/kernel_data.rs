//! Typed view of the kernel response
//!
//! The exchange buffer stays the wire format. The decision flow reads the
//! handful of tags it branches on once, right after the kernel returns.

use emv_common::{bcd_to_u64, tags, ExchangeBuffer};

/// Transaction type of a refund
pub const TRANSACTION_TYPE_REFUND: u8 = 0x20;

/// Authorisation response code of an approval ("00")
pub const APPROVED_RESPONSE_CODE: [u8; 2] = [0x30, 0x30];

/// Tags read from the kernel response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionData {
    /// Amount, authorised (binary), minor units
    pub amount: u64,
    /// ISO 4217 numeric code
    pub currency_code: u16,
    pub transaction_type: Option<u8>,
    pub terminal_transaction_qualifiers: Option<Vec<u8>>,
    pub online_pin_requested: bool,
    pub signature_requested: bool,
    pub declined_by_card: bool,
    pub preferred_language: Option<[u8; 2]>,
    pub available_offline_amount: Option<u64>,
}

impl TransactionData {
    pub fn from_buffer(buffer: &ExchangeBuffer) -> Self {
        let amount = buffer
            .find(tags::AMOUNT_AUTHORISED_BINARY)
            .map(be_number)
            .unwrap_or(0);
        let currency_code = buffer
            .find(tags::TRANSACTION_CURRENCY_CODE)
            .and_then(bcd_to_u64)
            .and_then(|code| u16::try_from(code).ok())
            .unwrap_or(0);

        Self {
            amount,
            currency_code,
            transaction_type: buffer
                .find(tags::TRANSACTION_TYPE)
                .and_then(|v| v.first().copied()),
            terminal_transaction_qualifiers: buffer
                .find(tags::TERMINAL_TRANSACTION_QUALIFIERS)
                .map(<[u8]>::to_vec),
            online_pin_requested: flag(buffer.find(tags::KERNEL_ONLINE_PIN_REQUESTED)),
            signature_requested: flag(buffer.find(tags::KERNEL_SIGNATURE_REQUESTED)),
            declined_by_card: buffer.contains(tags::PAYWAVE_DECLINED_BY_CARD),
            preferred_language: buffer
                .find(tags::KERNEL_SELECTED_PREFERRED_LANGUAGE)
                .and_then(|v| v.get(..2))
                .and_then(|v| v.try_into().ok()),
            available_offline_amount: buffer
                .find(tags::AVAILABLE_OFFLINE_SPENDING_AMOUNT)
                .and_then(bcd_to_u64),
        }
    }

    /// A refund the card declined itself
    pub fn is_refund_declined_by_card(&self) -> bool {
        self.transaction_type == Some(TRANSACTION_TYPE_REFUND) && self.declined_by_card
    }

    /// TTQ byte 1 announces qVSDC support
    pub fn qvsdc_supported(&self) -> Option<bool> {
        self.terminal_transaction_qualifiers
            .as_deref()
            .map(|ttq| ttq.first().is_some_and(|b| b & 0x20 != 0))
    }
}

fn flag(value: Option<&[u8]>) -> bool {
    value.and_then(|v| v.first()).is_some_and(|b| *b != 0)
}

/// Big-endian unsigned number of up to eight bytes
fn be_number(bytes: &[u8]) -> u64 {
    let start = bytes.len().saturating_sub(8);
    bytes[start..]
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}
