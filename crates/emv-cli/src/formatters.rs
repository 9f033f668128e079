//! Field formatters for human-readable output

use clap::ValueEnum;
use emv_common::{bcd_to_u64, tags, Tag};

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatMode {
    /// Raw hex output
    Raw,
    /// Human-readable formatted output
    Human,
}

impl FormatMode {
    pub fn description(&self) -> &'static str {
        match self {
            FormatMode::Raw => "Raw",
            FormatMode::Human => "Human-Readable",
        }
    }
}

/// Format a field value based on its tag type
pub fn format_value(tag: Tag, value: &[u8], mode: FormatMode) -> String {
    if mode == FormatMode::Raw {
        return hex::encode_upper(value);
    }

    match tag {
        tags::APPLICATION_LABEL | tags::KERNEL_TERMINAL_SUPPORTED_LANGUAGES
        | tags::KERNEL_SELECTED_PREFERRED_LANGUAGE | tags::LANGUAGE_PREFERENCE => ascii(value),

        tags::CARDHOLDER_NAME => ascii(value).trim().to_string(),

        // Authorisation response code, two ASCII characters
        tags::AUTHORISATION_RESPONSE_CODE => {
            let code = ascii(value);
            if value == b"00" {
                format!("{} (approved)", code)
            } else {
                code
            }
        }

        tags::APPLICATION_EXPIRATION_DATE => {
            if value.len() == 3 {
                format!("20{:02X}/{:02X} (Year/Month)", value[0], value[1])
            } else {
                hex::encode_upper(value)
            }
        }

        tags::APPLICATION_EFFECTIVE_DATE => {
            if value.len() == 3 {
                format!(
                    "20{:02X}/{:02X}/{:02X} (YY/MM/DD)",
                    value[0], value[1], value[2]
                )
            } else {
                hex::encode_upper(value)
            }
        }

        tags::ISSUER_COUNTRY_CODE | tags::TERMINAL_COUNTRY_CODE => match numeric_code(value) {
            Some(code) => match get_country_name(code) {
                Some(country) => format!("{} ({})", code, country),
                None => format!("{}", code),
            },
            None => hex::encode_upper(value),
        },

        tags::TRANSACTION_CURRENCY_CODE => match numeric_code(value) {
            Some(code) => match get_currency_name(code) {
                Some(currency) => currency.to_string(),
                None => format!("Currency Code {}", code),
            },
            None => hex::encode_upper(value),
        },

        tags::AMOUNT_AUTHORISED_NUMERIC
        | tags::AMOUNT_OTHER_NUMERIC
        | tags::AVAILABLE_OFFLINE_SPENDING_AMOUNT
        | tags::CLESS_TRANSACTION_LIMIT => match bcd_to_u64(value) {
            Some(amount) => format_amount(amount),
            None => hex::encode_upper(value),
        },

        tags::AMOUNT_AUTHORISED_BINARY => {
            if value.len() <= 8 {
                let amount = value.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
                format_amount(amount)
            } else {
                hex::encode_upper(value)
            }
        }

        tags::TRANSACTION_TYPE => match value.first() {
            Some(0x00) => "00 (Purchase)".to_string(),
            Some(0x01) => "01 (Cash)".to_string(),
            Some(0x09) => "09 (Purchase with cashback)".to_string(),
            Some(0x20) => "20 (Refund)".to_string(),
            _ => hex::encode_upper(value),
        },

        tags::TERMINAL_TRANSACTION_QUALIFIERS => format_ttq(value),

        tags::APPLICATION_PAN_SEQUENCE_NUMBER => {
            if value.len() == 1 {
                format!("{}", value[0])
            } else {
                hex::encode_upper(value)
            }
        }

        tags::CA_PUBLIC_KEY_INDEX_CARD | tags::CA_PUBLIC_KEY_INDEX_TERMINAL => {
            if value.len() == 1 {
                format!("{:02X} (decimal: {})", value[0], value[0])
            } else {
                hex::encode_upper(value)
            }
        }

        tags::KERNEL_SIGNATURE_REQUESTED
        | tags::KERNEL_ONLINE_PIN_REQUESTED
        | tags::KERNEL_PAN_IN_BLACK_LIST
        | tags::PAYWAVE_DECLINED_BY_CARD
        | tags::PAYWAVE_QVSDC_NOT_ALLOWED => match value.first() {
            Some(0) => "No".to_string(),
            Some(_) => "Yes".to_string(),
            None => "(empty)".to_string(),
        },

        // Large binary fields (certificates, key moduli)
        tags::ISSUER_PUBLIC_KEY_CERTIFICATE | tags::CA_PUBLIC_KEY_MODULUS => {
            if value.len() > 32 {
                format!(
                    "{} ... ({} bytes total)",
                    hex::encode_upper(&value[..32]),
                    value.len()
                )
            } else {
                hex::encode_upper(value)
            }
        }

        tags::TRACK_2_EQUIVALENT_DATA => {
            let hex_str = hex::encode_upper(value);
            hex_str.replace('D', " | ")
        }

        // Default: hex for everything else
        _ => hex::encode_upper(value),
    }
}

fn ascii(value: &[u8]) -> String {
    String::from_utf8(value.to_vec()).unwrap_or_else(|_| hex::encode_upper(value))
}

/// ISO numeric code stored on two bytes as BCD
fn numeric_code(value: &[u8]) -> Option<u16> {
    if value.len() != 2 {
        return None;
    }
    bcd_to_u64(value).and_then(|code| u16::try_from(code).ok())
}

fn format_amount(minor_units: u64) -> String {
    format!("{}.{:02}", minor_units / 100, minor_units % 100)
}

/// Terminal Transaction Qualifiers with the bits the decision flow reads
fn format_ttq(value: &[u8]) -> String {
    let mut flags = Vec::new();
    if let Some(b1) = value.first() {
        if b1 & 0x80 != 0 {
            flags.push("MSD");
        }
        if b1 & 0x20 != 0 {
            flags.push("qVSDC");
        }
    }
    if let Some(b2) = value.get(1) {
        if b2 & 0x80 != 0 {
            flags.push("online cryptogram required");
        }
        if b2 & 0x40 != 0 {
            flags.push("CVM required");
        }
    }
    if value.get(2).is_some_and(|b3| b3 & 0x80 != 0) {
        flags.push("issuer update processing");
    }

    if flags.is_empty() {
        hex::encode_upper(value)
    } else {
        format!("{} ({})", hex::encode_upper(value), flags.join(", "))
    }
}

/// ISO 3166-1 numeric country codes (subset)
fn get_country_name(code: u16) -> Option<&'static str> {
    match code {
        124 => Some("Canada"),
        840 => Some("United States"),
        826 => Some("United Kingdom"),
        276 => Some("Germany"),
        250 => Some("France"),
        380 => Some("Italy"),
        724 => Some("Spain"),
        528 => Some("Netherlands"),
        156 => Some("China"),
        392 => Some("Japan"),
        _ => None,
    }
}

/// ISO 4217 numeric currency codes (subset)
fn get_currency_name(code: u16) -> Option<&'static str> {
    match code {
        124 => Some("CAD (Canadian Dollar)"),
        840 => Some("USD (US Dollar)"),
        978 => Some("EUR (Euro)"),
        826 => Some("GBP (Pound Sterling)"),
        392 => Some("JPY (Japanese Yen)"),
        156 => Some("CNY (Chinese Yuan)"),
        _ => None,
    }
}
