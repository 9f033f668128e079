//! EMV Common - Tag vocabulary, BER-TLV decoding and the exchange buffer
//!
//! Everything that crosses the boundary with the contactless kernel is a
//! sequence of tagged records. This crate owns that wire format.

pub mod ber_tlv;
pub mod exchange;
pub mod tag;

pub use ber_tlv::{BerTlvDecoder, Tlv, TlvError};
pub use exchange::{ExchangeBuffer, ExchangeError, Position};
pub use tag::{get_tag_name, tags, Tag};

/// Search a BER-TLV region for a tag and return its value
///
/// Only the top level of the region is searched. Decoding stops at the first
/// malformed record, so a tag placed after corrupt data is not found.
///
/// # Arguments
/// * `data` - The BER-TLV encoded region to search
/// * `tag` - The tag to look for
///
/// # Returns
/// * `Some(&[u8])` - The value bytes if the tag is found
/// * `None` - If the tag is not found or the data is malformed before it
pub fn find_tag(data: &[u8], tag: Tag) -> Option<&[u8]> {
    BerTlvDecoder::new(data)
        .map_while(Result::ok)
        .find(|tlv| tlv.tag == tag)
        .map(|tlv| tlv.value)
}

/// Decode a packed BCD number such as an EMV numeric amount
///
/// Returns `None` if a nibble is not a decimal digit or the number does not
/// fit in a `u64`.
pub fn bcd_to_u64(bytes: &[u8]) -> Option<u64> {
    let mut value: u64 = 0;
    for byte in bytes {
        for nibble in [byte >> 4, byte & 0x0F] {
            if nibble > 9 {
                return None;
            }
            value = value.checked_mul(10)?.checked_add(u64::from(nibble))?;
        }
    }
    Some(value)
}

/// Decode a compressed numeric field (digits, right padded with `F`)
///
/// Used for the PAN. Returns `None` if a digit nibble follows padding or a
/// nibble is neither a digit nor `F`.
pub fn cn_to_digits(bytes: &[u8]) -> Option<String> {
    let mut digits = String::with_capacity(bytes.len() * 2);
    let mut padding = false;

    for byte in bytes {
        for nibble in [byte >> 4, byte & 0x0F] {
            match nibble {
                0..=9 if !padding => digits.push(char::from(b'0' + nibble)),
                0x0F => padding = true,
                _ => return None,
            }
        }
    }
    Some(digits)
}
