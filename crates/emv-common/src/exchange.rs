//! Tagged exchange buffer
//!
//! The buffer exchanged with the contactless kernel: an ordered sequence of
//! tag/length/value records written into a single store of fixed logical
//! capacity. Records are laid out as BER-TLV, so the raw region can be handed
//! to [`BerTlvDecoder`](crate::BerTlvDecoder) unchanged.
//!
//! A zero-length record means "please fill in this tag" in a request buffer
//! and "present but empty" in a response buffer. The buffer does not know
//! which of the two it is; callers keep track.

use thiserror::Error;

use crate::ber_tlv::{encode_length, encoded_length_len, BerTlvDecoder, TlvError};
use crate::tag::Tag;

/// Errors raised by exchange buffer operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    #[error("unable to allocate {capacity} bytes for the exchange buffer")]
    AllocationFailed { capacity: usize },
    #[error("record needs {needed} bytes but only {remaining} remain")]
    CapacityExceeded { needed: usize, remaining: usize },
    #[error("tag {0} is not a well-formed BER tag")]
    InvalidTag(Tag),
    #[error("value of {0} bytes does not fit a 32-bit length")]
    ValueTooLong(usize),
    #[error("malformed exchange data: {0}")]
    Malformed(#[from] TlvError),
}

/// Opaque search cursor for [`ExchangeBuffer::find_next`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position(usize);

impl Position {
    /// Start of the buffer
    pub const NULL: Position = Position(0);
}

/// Growable record buffer with a hard capacity limit
///
/// The default buffer has no capacity; it stands in for a buffer that has
/// been moved out.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExchangeBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl ExchangeBuffer {
    /// Allocate a buffer able to hold `capacity` bytes of records
    pub fn with_capacity(capacity: usize) -> Result<Self, ExchangeError> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| ExchangeError::AllocationFailed { capacity })?;
        Ok(Self { data, capacity })
    }

    /// Build a buffer from already encoded records
    ///
    /// The bytes must decode cleanly as BER-TLV and fit in `capacity`.
    pub fn from_bytes(bytes: &[u8], capacity: usize) -> Result<Self, ExchangeError> {
        if bytes.len() > capacity {
            return Err(ExchangeError::CapacityExceeded {
                needed: bytes.len(),
                remaining: capacity,
            });
        }
        for record in BerTlvDecoder::new(bytes) {
            record?;
        }

        let mut buffer = Self::with_capacity(capacity)?;
        buffer.data.extend_from_slice(bytes);
        Ok(buffer)
    }

    /// Logical capacity in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes still available for new records
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Raw BER-TLV region
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Append one record
    ///
    /// Either the whole record is written or the buffer is left untouched.
    pub fn add_tag(&mut self, tag: Tag, value: &[u8]) -> Result<(), ExchangeError> {
        if !tag.is_well_formed() {
            return Err(ExchangeError::InvalidTag(tag));
        }
        if u32::try_from(value.len()).is_err() {
            return Err(ExchangeError::ValueTooLong(value.len()));
        }

        let needed = tag.encoded_len() + encoded_length_len(value.len()) + value.len();
        if needed > self.remaining() {
            return Err(ExchangeError::CapacityExceeded {
                needed,
                remaining: self.remaining(),
            });
        }
        self.data
            .try_reserve(needed)
            .map_err(|_| ExchangeError::AllocationFailed {
                capacity: self.capacity,
            })?;

        tag.encode_into(&mut self.data);
        encode_length(value.len(), &mut self.data);
        self.data.extend_from_slice(value);
        Ok(())
    }

    /// Append a zero-length record asking the kernel for `tag`
    pub fn request_tag(&mut self, tag: Tag) -> Result<(), ExchangeError> {
        self.add_tag(tag, &[])
    }

    /// Find the next record with `tag` at or after `position`
    ///
    /// On success the cursor moves past the returned record so that repeated
    /// calls enumerate every occurrence. When nothing matches the cursor is
    /// left where it was.
    pub fn find_next(&self, position: &mut Position, tag: Tag) -> Option<&[u8]> {
        let start = position.0.min(self.data.len());
        let mut decoder = BerTlvDecoder::new(&self.data[start..]);

        while let Ok(Some(tlv)) = decoder.parse_next() {
            if tlv.tag == tag {
                *position = Position(start + decoder.offset());
                return Some(tlv.value);
            }
        }
        None
    }

    /// First value recorded for `tag`
    pub fn find(&self, tag: Tag) -> Option<&[u8]> {
        let mut position = Position::NULL;
        self.find_next(&mut position, tag)
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.find(tag).is_some()
    }

    /// Mutable view of the first value recorded for `tag`
    ///
    /// The length cannot change, so the layout of later records is preserved.
    pub fn find_mut(&mut self, tag: Tag) -> Option<&mut [u8]> {
        let mut decoder = BerTlvDecoder::new(&self.data);
        let mut range = None;

        while let Ok(Some(tlv)) = decoder.parse_next() {
            if tlv.tag == tag {
                let end = decoder.offset();
                range = Some(end - tlv.length()..end);
                break;
            }
        }

        match range {
            Some(r) => Some(&mut self.data[r]),
            None => None,
        }
    }

    /// Iterate over all records in insertion order
    pub fn records(&self) -> impl Iterator<Item = (Tag, &[u8])> + '_ {
        BerTlvDecoder::new(&self.data)
            .map_while(Result::ok)
            .map(|tlv| (tlv.tag, tlv.value))
    }

    /// Logically empty the buffer, keeping its capacity
    ///
    /// Used to turn an input buffer into an output buffer in place.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Empty the buffer and give its storage back
    ///
    /// The logical capacity is unchanged; storage is reacquired on the next
    /// write.
    pub fn clear_and_release(&mut self) {
        self.data = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::tags;

    #[test]
    fn test_add_then_find() {
        let mut buffer = ExchangeBuffer::with_capacity(64).unwrap();
        buffer
            .add_tag(tags::APPLICATION_PAN, &[0x47, 0x61, 0x73, 0x90])
            .unwrap();
        buffer.add_tag(tags::TRANSACTION_TYPE, &[0x20]).unwrap();

        assert_eq!(buffer.find(tags::APPLICATION_PAN), Some(&[0x47, 0x61, 0x73, 0x90][..]));
        assert_eq!(buffer.find(tags::TRANSACTION_TYPE), Some(&[0x20][..]));
        assert_eq!(buffer.find(tags::APPLICATION_PAN_SEQUENCE_NUMBER), None);
    }

    #[test]
    fn test_wire_layout() {
        let mut buffer = ExchangeBuffer::with_capacity(32).unwrap();
        buffer.add_tag(tags::TERMINAL_TRANSACTION_QUALIFIERS, &[0x20, 0x00, 0x40, 0x00]).unwrap();
        buffer.request_tag(tags::LOG_FORMAT).unwrap();

        assert_eq!(
            buffer.as_bytes(),
            &[0x9F, 0x66, 0x04, 0x20, 0x00, 0x40, 0x00, 0x9F, 0x4F, 0x00]
        );
    }

    #[test]
    fn test_capacity_exceeded_leaves_buffer_untouched() {
        let mut buffer = ExchangeBuffer::with_capacity(8).unwrap();
        buffer.add_tag(tags::TRANSACTION_TYPE, &[0x00]).unwrap();
        let before = buffer.clone();

        let err = buffer
            .add_tag(tags::APPLICATION_PAN, &[0x11; 8])
            .unwrap_err();
        assert_eq!(
            err,
            ExchangeError::CapacityExceeded {
                needed: 10,
                remaining: 5
            }
        );
        assert_eq!(buffer, before);
    }

    #[test]
    fn test_invalid_tag_rejected() {
        let mut buffer = ExchangeBuffer::with_capacity(8).unwrap();
        assert_eq!(
            buffer.add_tag(Tag(0x1F), &[0x01]),
            Err(ExchangeError::InvalidTag(Tag(0x1F)))
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_enumerate_repeated_tag() {
        let mut buffer = ExchangeBuffer::with_capacity(64).unwrap();
        buffer.add_tag(tags::ISSUER_SCRIPT_TEMPLATE_1, b"A").unwrap();
        buffer.add_tag(tags::TRANSACTION_TYPE, &[0x00]).unwrap();
        buffer.add_tag(tags::ISSUER_SCRIPT_TEMPLATE_1, b"B").unwrap();
        buffer.add_tag(tags::ISSUER_SCRIPT_TEMPLATE_1, b"C").unwrap();

        let mut position = Position::NULL;
        let mut seen = Vec::new();
        while let Some(value) = buffer.find_next(&mut position, tags::ISSUER_SCRIPT_TEMPLATE_1) {
            seen.push(value.to_vec());
        }
        assert_eq!(seen, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);

        // Not found leaves the cursor in place
        let exhausted = position;
        assert!(buffer.find_next(&mut position, tags::ISSUER_SCRIPT_TEMPLATE_1).is_none());
        assert_eq!(position, exhausted);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut buffer = ExchangeBuffer::with_capacity(16).unwrap();
        buffer.add_tag(tags::APPLICATION_PAN, &[0x12, 0x34]).unwrap();
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(buffer.remaining(), 16);
        assert!(buffer.find(tags::APPLICATION_PAN).is_none());

        buffer.clear_and_release();
        buffer.add_tag(tags::APPLICATION_PAN, &[0x56]).unwrap();
        assert_eq!(buffer.find(tags::APPLICATION_PAN), Some(&[0x56][..]));
    }

    #[test]
    fn test_find_mut_patches_in_place() {
        let mut buffer = ExchangeBuffer::with_capacity(32).unwrap();
        buffer.add_tag(tags::TERMINAL_TRANSACTION_QUALIFIERS, &[0xA0, 0x00, 0x00, 0x00]).unwrap();
        buffer.add_tag(tags::TRANSACTION_TYPE, &[0x00]).unwrap();

        if let Some(ttq) = buffer.find_mut(tags::TERMINAL_TRANSACTION_QUALIFIERS) {
            ttq[0] &= 0x5F;
        }

        assert_eq!(
            buffer.find(tags::TERMINAL_TRANSACTION_QUALIFIERS),
            Some(&[0x00, 0x00, 0x00, 0x00][..])
        );
        assert_eq!(buffer.find(tags::TRANSACTION_TYPE), Some(&[0x00][..]));
    }

    #[test]
    fn test_from_bytes_validates() {
        let bytes = [0x5A, 0x02, 0x12, 0x34, 0x9C, 0x01, 0x20];
        let buffer = ExchangeBuffer::from_bytes(&bytes, 64).unwrap();
        assert_eq!(buffer.records().count(), 2);

        assert!(matches!(
            ExchangeBuffer::from_bytes(&[0x5A, 0x05, 0x12], 64),
            Err(ExchangeError::Malformed(_))
        ));
        assert!(matches!(
            ExchangeBuffer::from_bytes(&bytes, 4),
            Err(ExchangeError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn test_long_values_use_long_form_length() {
        let mut buffer = ExchangeBuffer::with_capacity(1040).unwrap();
        let script = vec![0x86; 300];
        buffer.add_tag(tags::ISSUER_SCRIPT_TEMPLATE_2, &script).unwrap();

        assert_eq!(&buffer.as_bytes()[..4], &[0x72, 0x82, 0x01, 0x2C]);
        assert_eq!(buffer.find(tags::ISSUER_SCRIPT_TEMPLATE_2), Some(script.as_slice()));
    }
}
