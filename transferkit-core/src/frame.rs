//! Transfer frames and their scannable text form.
//!
//! A frame renders as
//!
//! ```text
//! PBQR1:<index>:<total>:<fragment, base64url without padding>:<checksum, 8 hex digits>
//! ```
//!
//! The checksum is the first four bytes of
//! `SHA-256(index_be32 || total_be32 || fragment)`. It catches camera misreads
//! and makes the frame header tamper-evident; payload confidentiality and
//! authenticity come from the AEAD layer underneath.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};

use crate::{TransferError, TransferResult, MAX_FRAGMENT_SIZE};

/// Tag that opens every frame string.
pub const FRAME_PREFIX: &str = "PBQR1";

const FIELD_SEPARATOR: char = ':';
const CHECKSUM_HEX_LEN: usize = 8;
const MAX_ENCODED_FRAGMENT_LEN: usize = MAX_FRAGMENT_SIZE.div_ceil(3) * 4;

/// One bounded-size unit of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct Frame {
    /// Zero-based position of the fragment.
    pub index: u32,
    /// Number of frames in the transfer.
    pub total: u32,
    /// Slice of the encrypted payload.
    pub fragment: Vec<u8>,
    /// Integrity checksum over index, total and fragment.
    pub checksum: u32,
}

impl Frame {
    /// Creates a frame and computes its checksum.
    #[must_use]
    pub fn new(index: u32, total: u32, fragment: Vec<u8>) -> Self {
        let checksum = checksum(index, total, &fragment);
        Self {
            index,
            total,
            fragment,
            checksum,
        }
    }

    /// Whether this is the final frame of its transfer.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.total.checked_sub(1) == Some(self.index)
    }

    /// Whether the stored checksum matches the content.
    #[must_use]
    pub fn verify(&self) -> bool {
        self.checksum == checksum(self.index, self.total, &self.fragment)
    }

    /// Renders the frame as the text placed in the scannable code.
    #[must_use]
    pub fn to_code_string(&self) -> String {
        format!(
            "{FRAME_PREFIX}{sep}{}{sep}{}{sep}{}{sep}{:08x}",
            self.index,
            self.total,
            URL_SAFE_NO_PAD.encode(&self.fragment),
            self.checksum,
            sep = FIELD_SEPARATOR,
        )
    }

    /// Parses scanned text back into a frame.
    ///
    /// Leading and trailing whitespace is ignored.
    ///
    /// # Errors
    /// Returns [`TransferError::MalformedFrame`] if the text is not a frame,
    /// if `index >= total`, if the fragment exceeds [`MAX_FRAGMENT_SIZE`],
    /// or if the checksum does not match.
    pub fn parse(raw: &str) -> TransferResult<Self> {
        let mut fields = raw.trim().split(FIELD_SEPARATOR);
        let (Some(prefix), Some(index), Some(total), Some(fragment), Some(checksum_hex), None) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        ) else {
            return Err(malformed("wrong number of fields"));
        };

        if prefix != FRAME_PREFIX {
            return Err(malformed("unknown prefix"));
        }
        let index = parse_number(index, "index")?;
        let total = parse_number(total, "total")?;
        if total == 0 {
            return Err(malformed("total is zero"));
        }
        if index >= total {
            return Err(malformed("index out of range"));
        }

        if fragment.len() > MAX_ENCODED_FRAGMENT_LEN {
            return Err(malformed("fragment too long"));
        }
        let fragment = URL_SAFE_NO_PAD
            .decode(fragment)
            .map_err(|err| malformed(format!("fragment: {err}")))?;
        if fragment.len() > MAX_FRAGMENT_SIZE {
            return Err(malformed("fragment too long"));
        }

        if checksum_hex.len() != CHECKSUM_HEX_LEN
            || !checksum_hex.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(malformed("checksum is not 8 hex digits"));
        }
        let checksum =
            u32::from_str_radix(checksum_hex, 16).map_err(|_| malformed("checksum is not hex"))?;

        let frame = Self {
            index,
            total,
            fragment,
            checksum,
        };
        if !frame.verify() {
            return Err(malformed("checksum mismatch"));
        }
        Ok(frame)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_code_string())
    }
}

impl FromStr for Frame {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn checksum(index: u32, total: u32, fragment: &[u8]) -> u32 {
    let digest = Sha256::new()
        .chain_update(index.to_be_bytes())
        .chain_update(total.to_be_bytes())
        .chain_update(fragment)
        .finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn parse_number(field: &str, name: &str) -> TransferResult<u32> {
    // `u32::from_str` accepts a leading '+', which is not part of the format.
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(format!("{name} is not a number")));
    }
    field
        .parse()
        .map_err(|_| malformed(format!("{name} is out of range")))
}

fn malformed(reason: impl Into<String>) -> TransferError {
    TransferError::MalformedFrame(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_code_string_round_trip() {
        let frame = Frame::new(2, 5, b"\x00\xffsome ciphertext".to_vec());
        let text = frame.to_code_string();
        assert!(text.starts_with("PBQR1:2:5:"));
        assert_eq!(Frame::parse(&text).expect("parse"), frame);
    }

    #[test]
    fn test_empty_fragment() {
        let frame = Frame::new(0, 1, Vec::new());
        let text = frame.to_code_string();
        let parsed: Frame = text.parse().expect("parse");
        assert!(parsed.fragment.is_empty());
        assert!(parsed.is_last());
    }

    #[test]
    fn test_surrounding_whitespace_is_ignored() {
        let frame = Frame::new(0, 2, b"abc".to_vec());
        let text = format!("  {frame}\n");
        assert_eq!(Frame::parse(&text).expect("parse"), frame);
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let frame = Frame::new(1, 3, b"hello".to_vec());
        let tampered = Frame {
            fragment: b"hellp".to_vec(),
            ..frame
        };
        assert!(!tampered.verify());
        assert!(matches!(
            Frame::parse(&tampered.to_code_string()),
            Err(TransferError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_header_is_covered_by_checksum() {
        let frame = Frame::new(1, 3, b"hello".to_vec());
        let text = frame.to_code_string().replacen(":1:3:", ":2:3:", 1);
        assert!(Frame::parse(&text).is_err());
    }

    #[test]
    fn test_fragment_size_is_bounded() {
        let largest = Frame::new(0, 1, vec![0xab; MAX_FRAGMENT_SIZE]);
        assert_eq!(Frame::parse(&largest.to_code_string()).expect("parse"), largest);

        let oversized = Frame::new(0, 1, vec![0xab; MAX_FRAGMENT_SIZE + 1]);
        assert!(matches!(
            Frame::parse(&oversized.to_code_string()),
            Err(TransferError::MalformedFrame(_))
        ));

        let hostile = format!("PBQR1:0:1:{}:00000000", "A".repeat(1 << 20));
        assert!(matches!(
            Frame::parse(&hostile),
            Err(TransferError::MalformedFrame(_))
        ));
    }

    #[test_case("" ; "empty")]
    #[test_case("https://example.com" ; "unrelated url")]
    #[test_case("PBQR1:0:1:AAAA" ; "missing checksum")]
    #[test_case("PBQR2:0:1:AAAA:00000000" ; "unknown prefix")]
    #[test_case("PBQR1:+0:1:AAAA:00000000" ; "signed index")]
    #[test_case("PBQR1:0:0::00000000" ; "zero total")]
    #[test_case("PBQR1:3:3:AAAA:00000000" ; "index equals total")]
    #[test_case("PBQR1:0:1:A===:00000000" ; "bad base64")]
    #[test_case("PBQR1:0:1:AAAA:0000" ; "short checksum")]
    #[test_case("PBQR1:0:1:AAAA:0000000g" ; "non hex checksum")]
    #[test_case("PBQR1:0:1:AAAA:00000000:extra" ; "extra field")]
    fn test_malformed_strings(raw: &str) {
        assert!(matches!(
            Frame::parse(raw),
            Err(TransferError::MalformedFrame(_))
        ));
    }
}
