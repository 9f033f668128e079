pub mod check_config;
pub mod decode;
pub mod simulate;

use emv_common::{get_tag_name, tags, ExchangeBuffer};

use crate::formatters::{self, FormatMode};

/// Display the tags of a transaction buffer the merchant cares about
pub(crate) fn display_tags(buffer: &ExchangeBuffer, mode: FormatMode) {
    let wanted = [
        tags::APPLICATION_IDENTIFIER,
        tags::DF_NAME,
        tags::APPLICATION_PAN,
        tags::APPLICATION_PAN_SEQUENCE_NUMBER,
        tags::TRANSACTION_TYPE,
        tags::AMOUNT_AUTHORISED_NUMERIC,
        tags::AMOUNT_AUTHORISED_BINARY,
        tags::TRANSACTION_CURRENCY_CODE,
        tags::TERMINAL_TRANSACTION_QUALIFIERS,
        tags::CARD_TRANSACTION_QUALIFIERS,
        tags::AVAILABLE_OFFLINE_SPENDING_AMOUNT,
        tags::KERNEL_SIGNATURE_REQUESTED,
        tags::KERNEL_ONLINE_PIN_REQUESTED,
        tags::ENCIPHERED_PIN_CODE,
        tags::AUTHORISATION_RESPONSE_CODE,
        tags::PAYWAVE_ISSUER_SCRIPT_RESULT,
    ];

    for tag in wanted {
        if let Some(value) = buffer.find(tag) {
            println!(
                "  [{}] {}: {}",
                tag,
                get_tag_name(tag),
                formatters::format_value(tag, value, mode)
            );
        }
    }
}
