//! Binary-to-text codec for buffered payloads.
//!
//! Standard base64 alphabet with `=` padding. Every encoded string is a whole number of
//! four-character blocks, so decoding can reject truncated input outright.

use crate::common::{ENCODING_ALPHABET, ENCODING_BLOCK_SIZE, ENCODING_PAD};
use crate::errors::{ErrorKind, OstxError, OstxResult};

const INVALID: u8 = 0xFF;

const DECODE_TABLE: [u8; 256] = {
    let mut table = [INVALID; 256];
    let mut i = 0;
    while i < ENCODING_ALPHABET.len() {
        table[ENCODING_ALPHABET[i] as usize] = i as u8;
        i += 1;
    }
    table
};

/// Encodes `bytes` into padded base64 text.
///
/// ```rust
/// use ostx::common::encode;
///
/// assert_eq!(encode(b""), "");
/// assert_eq!(encode(b"hello"), "aGVsbG8=");
/// ```
pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(3) * ENCODING_BLOCK_SIZE);
    for chunk in bytes.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = chunk.get(1).copied().unwrap_or(0) as u32;
        let b2 = chunk.get(2).copied().unwrap_or(0) as u32;
        let triple = (b0 << 16) | (b1 << 8) | b2;

        out.push(ENCODING_ALPHABET[((triple >> 18) & 0x3F) as usize] as char);
        out.push(ENCODING_ALPHABET[((triple >> 12) & 0x3F) as usize] as char);
        if chunk.len() > 1 {
            out.push(ENCODING_ALPHABET[((triple >> 6) & 0x3F) as usize] as char);
        } else {
            out.push(ENCODING_PAD as char);
        }
        if chunk.len() > 2 {
            out.push(ENCODING_ALPHABET[(triple & 0x3F) as usize] as char);
        } else {
            out.push(ENCODING_PAD as char);
        }
    }
    out
}

/// Decodes padded base64 text produced by [`encode`].
///
/// # Errors
///
/// Returns an error of kind [`ErrorKind::DecodingError`] when the length is not a multiple of
/// the block size, when a character is outside the alphabet, when padding appears anywhere but
/// at the end of the last block, or when the unused trailing bits are not zero.
pub fn decode(text: &str) -> OstxResult<Vec<u8>> {
    let input = text.as_bytes();
    if input.len() % ENCODING_BLOCK_SIZE != 0 {
        return Err(decoding_error(&format!(
            "encoded length {} is not a multiple of {}",
            input.len(),
            ENCODING_BLOCK_SIZE
        )));
    }

    let blocks = input.len() / ENCODING_BLOCK_SIZE;
    let mut out = Vec::with_capacity(blocks * 3);

    for (index, block) in input.chunks(ENCODING_BLOCK_SIZE).enumerate() {
        let is_last = index + 1 == blocks;
        let padding = block.iter().rev().take_while(|&&c| c == ENCODING_PAD).count();
        if padding > 2 || (padding > 0 && !is_last) {
            return Err(decoding_error(&format!(
                "misplaced padding in block {}",
                index
            )));
        }

        let mut sextets = [0u32; ENCODING_BLOCK_SIZE];
        for (i, &c) in block[..ENCODING_BLOCK_SIZE - padding].iter().enumerate() {
            let value = DECODE_TABLE[c as usize];
            if value == INVALID {
                return Err(decoding_error(&format!(
                    "invalid character {:?} at offset {}",
                    c as char,
                    index * ENCODING_BLOCK_SIZE + i
                )));
            }
            sextets[i] = value as u32;
        }

        let triple = (sextets[0] << 18) | (sextets[1] << 12) | (sextets[2] << 6) | sextets[3];
        let bytes = [(triple >> 16) as u8, (triple >> 8) as u8, triple as u8];
        let produced = 3 - padding;

        // leftover bits of a padded block must be zero, otherwise two inputs decode alike
        let trailing = match padding {
            1 => triple & 0xFF,
            2 => triple & 0xFFFF,
            _ => 0,
        };
        if trailing != 0 {
            return Err(decoding_error(&format!(
                "non-zero trailing bits in block {}",
                index
            )));
        }

        out.extend_from_slice(&bytes[..produced]);
    }

    Ok(out)
}

fn decoding_error(message: &str) -> OstxError {
    log::debug!("Rejecting encoded payload: {}", message);
    OstxError::new(message, ErrorKind::DecodingError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_vectors() {
        assert_eq!(encode(b""), "");
        assert_eq!(encode(b"f"), "Zg==");
        assert_eq!(encode(b"fo"), "Zm8=");
        assert_eq!(encode(b"foo"), "Zm9v");
        assert_eq!(encode(b"foob"), "Zm9vYg==");
        assert_eq!(encode(b"fooba"), "Zm9vYmE=");
        assert_eq!(encode(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn test_decode_known_vectors() {
        assert_eq!(decode("").unwrap(), b"");
        assert_eq!(decode("Zg==").unwrap(), b"f");
        assert_eq!(decode("Zm8=").unwrap(), b"fo");
        assert_eq!(decode("Zm9vYmFy").unwrap(), b"foobar");
    }

    #[test]
    fn test_round_trip_all_byte_values() {
        let bytes: Vec<u8> = (0..=255u8).collect();
        for len in [0usize, 1, 2, 3, 4, 5, 7, 64, 255, 256] {
            let slice = &bytes[..len];
            assert_eq!(decode(&encode(slice)).unwrap(), slice, "length {}", len);
        }
    }

    #[test]
    fn test_decode_rejects_bad_length() {
        let err = decode("Zm9").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DecodingError);
        assert!(decode("Zm9vY").is_err());
    }

    #[test]
    fn test_decode_rejects_character_outside_alphabet() {
        let err = decode("Zm9*").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DecodingError);
        assert!(decode("Zm 9").is_err());
        assert!(decode("Zm9v\nmFy").is_err());
        assert!(decode("Zm9-").is_err());
    }

    #[test]
    fn test_decode_rejects_misplaced_padding() {
        assert!(decode("Zg==Zm9v").is_err());
        assert!(decode("Z===").is_err());
        assert!(decode("Zm=v").is_err());
    }

    #[test]
    fn test_decode_rejects_non_canonical_trailing_bits() {
        // "Zh==" carries bits that "Zg==" leaves as zero
        assert!(decode("Zh==").is_err());
        assert!(decode("Zm9=").is_err());
    }
}
