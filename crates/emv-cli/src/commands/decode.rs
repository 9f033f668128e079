//! Decode a BER-TLV buffer, nested templates included

use emv_common::{get_tag_name, BerTlvDecoder, TlvError};

use crate::formatters::{self, FormatMode};

/// Values longer than this are truncated in the listing
const MAX_DISPLAYED_BYTES: usize = 32;

pub fn cmd_decode(input: &str, mode: FormatMode) {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let data = match hex::decode(&cleaned) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Invalid hex string: {}", e);
            return;
        }
    };

    println!("BER-TLV Decode - {} Mode\n", mode.description());

    let mut lines = Vec::new();
    let result = decode_lines(&data, 0, mode, &mut lines);
    for line in &lines {
        println!("{}", line);
    }
    if let Err(e) = result {
        eprintln!("\nMalformed data: {}", e);
    }
}

/// Describe every record of `data`, one line each
///
/// Constructed records are followed by their content, indented one level.
/// Listing stops at the first malformed record.
pub fn decode_lines(
    data: &[u8],
    indent: usize,
    mode: FormatMode,
    lines: &mut Vec<String>,
) -> Result<(), TlvError> {
    let indent_str = " ".repeat(indent * 2);

    for tlv in BerTlvDecoder::new(data) {
        let tlv = tlv?;
        let name = get_tag_name(tlv.tag);

        if tlv.tag.is_constructed() {
            lines.push(format!(
                "{}[{}] {} ({} bytes)",
                indent_str,
                tlv.tag,
                name,
                tlv.length()
            ));
            decode_lines(tlv.value, indent + 1, mode, lines)?;
            continue;
        }

        let value = if mode == FormatMode::Raw && tlv.length() > MAX_DISPLAYED_BYTES {
            format!(
                "{}... ({} bytes)",
                hex::encode_upper(&tlv.value[..MAX_DISPLAYED_BYTES]),
                tlv.length()
            )
        } else {
            formatters::format_value(tlv.tag, tlv.value, mode)
        };
        lines.push(format!("{}[{}] {}: {}", indent_str, tlv.tag, name, value));
    }
    Ok(())
}
