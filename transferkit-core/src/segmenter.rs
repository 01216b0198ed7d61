//! Export-side splitting of the encrypted payload into frames.

use crate::frame::Frame;
use crate::{TransferError, TransferResult};

/// Splits `ciphertext` into frames carrying at most `max_fragment_size` bytes each.
///
/// An empty buffer still produces one frame with an empty fragment, so the
/// receiver always gets a terminal signal. Output is deterministic: the same
/// inputs always yield byte-identical frames.
///
/// # Errors
/// Returns [`TransferError::InvalidInput`] if `max_fragment_size` is zero or
/// if the buffer would need more than `u32::MAX` frames.
pub fn segment(ciphertext: &[u8], max_fragment_size: usize) -> TransferResult<Vec<Frame>> {
    if max_fragment_size == 0 {
        return Err(TransferError::invalid_input(
            "max_fragment_size",
            "must be at least 1",
        ));
    }

    let total = u32::try_from(frame_count(ciphertext.len(), max_fragment_size)).map_err(|_| {
        TransferError::invalid_input("ciphertext", "payload needs more than u32::MAX frames")
    })?;

    if ciphertext.is_empty() {
        return Ok(vec![Frame::new(0, total, Vec::new())]);
    }

    Ok(ciphertext
        .chunks(max_fragment_size)
        .zip(0..total)
        .map(|(fragment, index)| Frame::new(index, total, fragment.to_vec()))
        .collect())
}

/// Number of frames `segment` produces for a buffer of `len` bytes.
#[must_use]
pub fn frame_count(len: usize, max_fragment_size: usize) -> usize {
    len.div_ceil(max_fragment_size.max(1)).max(1)
}
