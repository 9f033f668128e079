//! Tag identifiers and the tag vocabulary shared with the payment kernel

use std::fmt;

/// EMV tag identifier
///
/// The numeric value is the big-endian reading of the BER tag bytes, so
/// `Tag(0x9F66)` is written on the wire as `9F 66`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub u32);

impl Tag {
    /// Number of bytes the tag occupies when encoded (1 to 4)
    pub fn encoded_len(self) -> usize {
        match self.0 {
            0..=0xFF => 1,
            0x100..=0xFFFF => 2,
            0x1_0000..=0xFF_FFFF => 3,
            _ => 4,
        }
    }

    /// Tag bytes, most significant first, without leading zero bytes
    pub fn to_bytes(self) -> Vec<u8> {
        let len = self.encoded_len();
        self.0.to_be_bytes()[4 - len..].to_vec()
    }

    /// Append the tag bytes to `out`
    pub fn encode_into(self, out: &mut Vec<u8>) {
        let len = self.encoded_len();
        out.extend_from_slice(&self.0.to_be_bytes()[4 - len..]);
    }

    /// Check that the value reads back as the same tag under BER rules
    ///
    /// A single byte tag must not have its low five bits all set; a multi
    /// byte tag must start with `xxx1_1111`, have bit 8 set on every
    /// intermediate byte and clear on the last one.
    pub fn is_well_formed(self) -> bool {
        if self.0 == 0 {
            return false;
        }

        let bytes = self.to_bytes();
        let first = bytes[0];

        if bytes.len() == 1 {
            return first & 0x1F != 0x1F;
        }

        if first & 0x1F != 0x1F {
            return false;
        }

        let last = bytes.len() - 1;
        bytes[1..last].iter().all(|b| b & 0x80 != 0) && bytes[last] & 0x80 == 0
    }

    /// Constructed tags carry a nested TLV sequence as their value
    pub fn is_constructed(self) -> bool {
        self.to_bytes()[0] & 0x20 != 0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode_upper(self.to_bytes()))
    }
}

impl From<u32> for Tag {
    fn from(value: u32) -> Self {
        Tag(value)
    }
}

/// Tags exchanged between the terminal application and the contactless kernel
///
/// EMV tags keep their standard numbers. Kernel interface tags live in the
/// private class range `DF81xx`.
pub mod tags {
    use super::Tag;

    // Application metadata
    pub const APPLICATION_IDENTIFIER: Tag = Tag(0x4F);
    pub const APPLICATION_LABEL: Tag = Tag(0x50);
    pub const TRACK_2_EQUIVALENT_DATA: Tag = Tag(0x57);
    pub const APPLICATION_PAN: Tag = Tag(0x5A);
    pub const CARDHOLDER_NAME: Tag = Tag(0x5F20);
    pub const APPLICATION_EXPIRATION_DATE: Tag = Tag(0x5F24);
    pub const APPLICATION_EFFECTIVE_DATE: Tag = Tag(0x5F25);
    pub const ISSUER_COUNTRY_CODE: Tag = Tag(0x5F28);
    pub const TRANSACTION_CURRENCY_CODE: Tag = Tag(0x5F2A);
    pub const LANGUAGE_PREFERENCE: Tag = Tag(0x5F2D);
    pub const APPLICATION_PAN_SEQUENCE_NUMBER: Tag = Tag(0x5F34);
    pub const DF_NAME: Tag = Tag(0x84);
    pub const AIP: Tag = Tag(0x82);

    // Issuer response
    pub const ISSUER_SCRIPT_TEMPLATE_1: Tag = Tag(0x71);
    pub const ISSUER_SCRIPT_TEMPLATE_2: Tag = Tag(0x72);
    pub const RESPONSE_MESSAGE_TEMPLATE_FORMAT_2: Tag = Tag(0x77);
    pub const AUTHORISATION_RESPONSE_CODE: Tag = Tag(0x8A);
    pub const ISSUER_AUTHENTICATION_DATA: Tag = Tag(0x91);

    // Transaction data
    pub const AMOUNT_AUTHORISED_BINARY: Tag = Tag(0x81);
    pub const TRANSACTION_TYPE: Tag = Tag(0x9C);
    pub const AMOUNT_AUTHORISED_NUMERIC: Tag = Tag(0x9F02);
    pub const AMOUNT_OTHER_NUMERIC: Tag = Tag(0x9F03);
    pub const ISSUER_APPLICATION_DATA: Tag = Tag(0x9F10);
    pub const TERMINAL_COUNTRY_CODE: Tag = Tag(0x9F1A);
    pub const APPLICATION_CRYPTOGRAM: Tag = Tag(0x9F26);
    pub const CRYPTOGRAM_INFORMATION_DATA: Tag = Tag(0x9F27);
    pub const APPLICATION_TRANSACTION_COUNTER: Tag = Tag(0x9F36);
    pub const UNPREDICTABLE_NUMBER: Tag = Tag(0x9F37);
    pub const LOG_FORMAT: Tag = Tag(0x9F4F);
    pub const AVAILABLE_OFFLINE_SPENDING_AMOUNT: Tag = Tag(0x9F5D);

    // Cryptography and certificates
    pub const CA_PUBLIC_KEY_INDEX_CARD: Tag = Tag(0x8F);
    pub const ISSUER_PUBLIC_KEY_CERTIFICATE: Tag = Tag(0x90);
    pub const CA_PUBLIC_KEY_INDEX_TERMINAL: Tag = Tag(0x9F22);

    // payWave qualifiers
    pub const TERMINAL_TRANSACTION_QUALIFIERS: Tag = Tag(0x9F66);
    pub const CARD_TRANSACTION_QUALIFIERS: Tag = Tag(0x9F6C);

    // Kernel interface
    pub const KERNEL_PAYMENT_FLOW_STOP: Tag = Tag(0xDF8101);
    pub const KERNEL_PAYMENT_FLOW_CUSTOM: Tag = Tag(0xDF8102);
    pub const KERNEL_TERMINAL_SUPPORTED_LANGUAGES: Tag = Tag(0xDF8103);
    pub const KERNEL_SELECTED_PREFERRED_LANGUAGE: Tag = Tag(0xDF8104);
    pub const KERNEL_SIGNATURE_REQUESTED: Tag = Tag(0xDF8105);
    pub const KERNEL_ONLINE_PIN_REQUESTED: Tag = Tag(0xDF8106);
    pub const KERNEL_PAN_IN_BLACK_LIST: Tag = Tag(0xDF8107);
    pub const KERNEL_DEBUG_ACTIVATION: Tag = Tag(0xDF8108);
    pub const CA_PUBLIC_KEY_MODULUS: Tag = Tag(0xDF8110);
    pub const CA_PUBLIC_KEY_EXPONENT: Tag = Tag(0xDF8111);

    // Entry point
    pub const FINAL_SELECT_COMMAND_SENT: Tag = Tag(0xDF8120);
    pub const CLESS_TRANSACTION_LIMIT: Tag = Tag(0xDF8121);
    pub const AID_OPTIONS: Tag = Tag(0xDF8122);

    // payWave kernel outputs
    pub const PAYWAVE_DECLINED_BY_CARD: Tag = Tag(0xDF8130);
    pub const PAYWAVE_ISSUER_SCRIPT_LIST: Tag = Tag(0xDF8131);
    pub const PAYWAVE_ISSUER_SCRIPT_RESULT: Tag = Tag(0xDF8132);
    pub const PAYWAVE_TRANSACTION_LOG_RECORD: Tag = Tag(0xDF8133);
    pub const PAYWAVE_QVSDC_NOT_ALLOWED: Tag = Tag(0xDF8134);

    // Terminal application
    pub const ENCIPHERED_PIN_CODE: Tag = Tag(0xDF8140);
    pub const ZERO_CHECK_DEACTIVATED: Tag = Tag(0xDF8141);
}

/// Get a human-readable name for a tag
pub fn get_tag_name(tag: Tag) -> &'static str {
    match tag.0 {
        0x4F => "Application Identifier (AID)",
        0x50 => "Application Label",
        0x57 => "Track 2 Equivalent Data",
        0x5A => "Application PAN",
        0x5F20 => "Cardholder Name",
        0x5F24 => "Application Expiration Date",
        0x5F25 => "Application Effective Date",
        0x5F28 => "Issuer Country Code",
        0x5F2A => "Transaction Currency Code",
        0x5F2D => "Language Preference",
        0x5F34 => "Application PAN Sequence Number",
        0x71 => "Issuer Script Template 1",
        0x72 => "Issuer Script Template 2",
        0x77 => "Response Message Template Format 2",
        0x81 => "Amount, Authorised (Binary)",
        0x82 => "Application Interchange Profile",
        0x84 => "Dedicated File (DF) Name",
        0x8A => "Authorisation Response Code",
        0x8F => "CA Public Key Index",
        0x90 => "Issuer Public Key Certificate",
        0x91 => "Issuer Authentication Data",
        0x9C => "Transaction Type",
        0x9F02 => "Amount, Authorised (Numeric)",
        0x9F03 => "Amount, Other (Numeric)",
        0x9F10 => "Issuer Application Data",
        0x9F1A => "Terminal Country Code",
        0x9F22 => "CA Public Key Index (Terminal)",
        0x9F26 => "Application Cryptogram",
        0x9F27 => "Cryptogram Information Data",
        0x9F36 => "Application Transaction Counter",
        0x9F37 => "Unpredictable Number",
        0x9F4F => "Log Format",
        0x9F5D => "Available Offline Spending Amount",
        0x9F66 => "Terminal Transaction Qualifiers",
        0x9F6C => "Card Transaction Qualifiers",
        0xDF8101 => "Kernel Payment Flow Stop",
        0xDF8102 => "Kernel Payment Flow Customisation",
        0xDF8103 => "Terminal Supported Languages",
        0xDF8104 => "Selected Preferred Language",
        0xDF8105 => "Signature Requested",
        0xDF8106 => "Online PIN Requested",
        0xDF8107 => "PAN In Black List",
        0xDF8108 => "Kernel Debug Activation",
        0xDF8110 => "CA Public Key Modulus",
        0xDF8111 => "CA Public Key Exponent",
        0xDF8120 => "Final Select Command Sent",
        0xDF8121 => "Contactless Transaction Limit",
        0xDF8122 => "AID Options",
        0xDF8130 => "Declined By Card",
        0xDF8131 => "Issuer Script List",
        0xDF8132 => "Issuer Script Result",
        0xDF8133 => "Transaction Log Record",
        0xDF8134 => "qVSDC Not Allowed",
        0xDF8140 => "Enciphered PIN Code",
        0xDF8141 => "Zero Check Deactivated",
        _ => "Unknown Tag",
    }
}
