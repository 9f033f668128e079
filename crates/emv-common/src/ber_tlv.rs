//! Cursor-based BER-TLV decoder
//!
//! Decodes one tag/length/value triple per call. Tags may span up to four
//! bytes and lengths use DER encoding (short form, or `0x81..=0x84` followed
//! by the length bytes). The first malformed record ends the sequence: the
//! decoder keeps returning that error and never tries to resynchronise.

use thiserror::Error;

use crate::tag::Tag;

/// Longest tag accepted by the decoder
const MAX_TAG_BYTES: usize = 4;

/// Longest long-form length prefix accepted by the decoder
const MAX_LENGTH_BYTES: usize = 4;

/// Reasons a BER-TLV region cannot be decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TlvError {
    #[error("tag truncated at offset {offset}")]
    TruncatedTag { offset: usize },
    #[error("tag at offset {offset} is longer than {MAX_TAG_BYTES} bytes")]
    TagTooLong { offset: usize },
    #[error("length field truncated at offset {offset}")]
    TruncatedLength { offset: usize },
    #[error("unsupported length encoding 0x{first_byte:02X} at offset {offset}")]
    UnsupportedLength { offset: usize, first_byte: u8 },
    #[error("declared length {declared} at offset {offset} exceeds the {remaining} remaining bytes")]
    ValueOverrun {
        offset: usize,
        declared: usize,
        remaining: usize,
    },
}

/// One decoded record, borrowing its value from the decoded region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    pub tag: Tag,
    pub value: &'a [u8],
    /// Bytes used by tag, length and value together
    pub consumed: usize,
}

impl Tlv<'_> {
    pub fn length(&self) -> usize {
        self.value.len()
    }
}

/// Forward-only decoder over a fixed byte region
#[derive(Debug, Clone)]
pub struct BerTlvDecoder<'a> {
    data: &'a [u8],
    offset: usize,
    failure: Option<TlvError>,
}

impl<'a> BerTlvDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            offset: 0,
            failure: None,
        }
    }

    /// Current read offset inside the region
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Parse the next record
    ///
    /// # Returns
    /// * `Ok(Some(tlv))` - A record was decoded and the cursor advanced past it
    /// * `Ok(None)` - End of data
    /// * `Err(e)` - Malformed input; every later call returns the same error
    pub fn parse_next(&mut self) -> Result<Option<Tlv<'a>>, TlvError> {
        if let Some(err) = self.failure {
            return Err(err);
        }

        match self.decode_at(self.offset) {
            Ok(Some(tlv)) => {
                self.offset += tlv.consumed;
                Ok(Some(tlv))
            }
            Ok(None) => {
                self.offset = self.data.len();
                Ok(None)
            }
            Err(err) => {
                self.failure = Some(err);
                Err(err)
            }
        }
    }

    fn decode_at(&self, start: usize) -> Result<Option<Tlv<'a>>, TlvError> {
        let data = self.data;
        let mut i = start;

        // Zero bytes may pad the space between records
        while i < data.len() && data[i] == 0x00 {
            i += 1;
        }
        if i >= data.len() {
            return Ok(None);
        }

        // Tag
        let tag_start = i;
        let mut tag_value = u32::from(data[i]);
        i += 1;

        if data[tag_start] & 0x1F == 0x1F {
            loop {
                if i >= data.len() {
                    return Err(TlvError::TruncatedTag { offset: tag_start });
                }
                if i - tag_start >= MAX_TAG_BYTES {
                    return Err(TlvError::TagTooLong { offset: tag_start });
                }
                let byte = data[i];
                tag_value = (tag_value << 8) | u32::from(byte);
                i += 1;
                if byte & 0x80 == 0 {
                    break;
                }
            }
        }

        // Length
        let length_start = i;
        if i >= data.len() {
            return Err(TlvError::TruncatedLength {
                offset: length_start,
            });
        }

        let first = data[i];
        i += 1;

        let length = if first & 0x80 == 0 {
            usize::from(first)
        } else {
            let num_len_bytes = usize::from(first & 0x7F);
            if num_len_bytes == 0 || num_len_bytes > MAX_LENGTH_BYTES {
                return Err(TlvError::UnsupportedLength {
                    offset: length_start,
                    first_byte: first,
                });
            }
            if i + num_len_bytes > data.len() {
                return Err(TlvError::TruncatedLength {
                    offset: length_start,
                });
            }

            let mut actual = 0usize;
            for byte in &data[i..i + num_len_bytes] {
                actual = (actual << 8) | usize::from(*byte);
            }
            i += num_len_bytes;
            actual
        };

        // Value
        let remaining = data.len() - i;
        if length > remaining {
            return Err(TlvError::ValueOverrun {
                offset: length_start,
                declared: length,
                remaining,
            });
        }

        Ok(Some(Tlv {
            tag: Tag(tag_value),
            value: &data[i..i + length],
            consumed: i + length - start,
        }))
    }
}

impl<'a> Iterator for BerTlvDecoder<'a> {
    type Item = Result<Tlv<'a>, TlvError>;

    /// Yields records until end of data, or a single error after which the
    /// iteration stops
    fn next(&mut self) -> Option<Self::Item> {
        if self.failure.is_some() {
            return None;
        }
        self.parse_next().transpose()
    }
}

/// Append a DER-encoded length to `out`
pub fn encode_length(length: usize, out: &mut Vec<u8>) {
    if length < 0x80 {
        out.push(length as u8);
        return;
    }

    let bytes = (length as u64).to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    let significant = &bytes[skip..];
    out.push(0x80 | significant.len() as u8);
    out.extend_from_slice(significant);
}

/// Number of bytes `encode_length` writes for `length`
pub fn encoded_length_len(length: usize) -> usize {
    match length {
        0..=0x7F => 1,
        0x80..=0xFF => 2,
        0x100..=0xFFFF => 3,
        0x1_0000..=0xFF_FFFF => 4,
        _ => 5,
    }
}
