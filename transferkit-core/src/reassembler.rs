//! Import-side reassembly of frames arriving in any order.
//!
//! The reassembler only knows indexed byte ranges. It never looks inside the
//! fragments and has no notion of encryption.

use std::collections::BTreeMap;

use crate::frame::Frame;

/// Why a frame was not merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The frame's `total` differs from the transfer in progress.
    ForeignTransfer {
        /// Frame count fixed by the first accepted frame.
        expected: u32,
        /// Frame count carried by the rejected frame.
        found: u32,
    },
    /// The index is already filled with a different fragment.
    Conflict {
        /// Index claimed twice.
        index: u32,
    },
    /// `index >= total`.
    IndexOutOfRange {
        /// Offending index.
        index: u32,
        /// Frame count carried by the frame.
        total: u32,
    },
    /// The frame announces more frames than this importer accepts.
    TooManyFrames {
        /// Frame count carried by the frame.
        total: u32,
        /// Configured ceiling.
        limit: u32,
    },
    /// The buffer was already produced.
    AlreadyComplete,
}

/// Result of offering one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyOutcome {
    /// Frame merged (or a harmless duplicate); more frames are needed.
    Progress {
        /// Distinct indices received so far.
        received: u32,
        /// Frame count of the transfer.
        total: u32,
    },
    /// Every index is present. Fragments concatenated in index order.
    Complete(Vec<u8>),
    /// Frame not merged; state unchanged.
    Rejected(RejectReason),
}

/// Collects frames until every index of one transfer is present.
#[derive(Debug)]
pub struct Reassembler {
    fragments: BTreeMap<u32, Vec<u8>>,
    total: Option<u32>,
    limit: u32,
    complete: bool,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    /// Creates a reassembler accepting any frame count.
    #[must_use]
    pub const fn new() -> Self {
        Self::with_limit(u32::MAX)
    }

    /// Creates a reassembler that refuses transfers announcing more than `limit` frames.
    #[must_use]
    pub const fn with_limit(limit: u32) -> Self {
        Self {
            fragments: BTreeMap::new(),
            total: None,
            limit,
            complete: false,
        }
    }

    /// Frame count of the transfer, once the first frame has been accepted.
    #[must_use]
    pub const fn total(&self) -> Option<u32> {
        self.total
    }

    /// Distinct indices received so far.
    #[must_use]
    pub fn received(&self) -> u32 {
        if self.complete {
            return self.total.unwrap_or(0);
        }
        // Bounded by `total`, which is a u32.
        u32::try_from(self.fragments.len()).unwrap_or(u32::MAX)
    }

    /// Whether the buffer has been produced.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Indices still missing, in ascending order. Empty before the first frame.
    #[must_use]
    pub fn missing(&self) -> Vec<u32> {
        match self.total {
            Some(total) if !self.complete => (0..total)
                .filter(|index| !self.fragments.contains_key(index))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Offers one frame.
    pub fn accept(&mut self, frame: Frame) -> ReassemblyOutcome {
        if self.complete {
            return ReassemblyOutcome::Rejected(RejectReason::AlreadyComplete);
        }

        let total = match self.total {
            Some(expected) if expected != frame.total => {
                return ReassemblyOutcome::Rejected(RejectReason::ForeignTransfer {
                    expected,
                    found: frame.total,
                });
            }
            Some(expected) => expected,
            None => {
                if frame.total > self.limit {
                    return ReassemblyOutcome::Rejected(RejectReason::TooManyFrames {
                        total: frame.total,
                        limit: self.limit,
                    });
                }
                frame.total
            }
        };

        if frame.index >= total {
            return ReassemblyOutcome::Rejected(RejectReason::IndexOutOfRange {
                index: frame.index,
                total: frame.total,
            });
        }

        if let Some(existing) = self.fragments.get(&frame.index) {
            if *existing != frame.fragment {
                return ReassemblyOutcome::Rejected(RejectReason::Conflict { index: frame.index });
            }
        } else {
            self.total = Some(total);
            self.fragments.insert(frame.index, frame.fragment);
        }

        let received = self.received();
        if received < total {
            return ReassemblyOutcome::Progress { received, total };
        }

        self.complete = true;
        let fragments = std::mem::take(&mut self.fragments);
        let mut buffer = Vec::with_capacity(fragments.values().map(Vec::len).sum());
        for fragment in fragments.into_values() {
            buffer.extend_from_slice(&fragment);
        }
        ReassemblyOutcome::Complete(buffer)
    }
}
