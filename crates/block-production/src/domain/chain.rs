//! Chain index nodes
//!
//! A `ChainedHeader` is an immutable position in the header chain. Nodes link
//! to their predecessor through an `Arc`, so a tip keeps its whole history
//! alive and can be shared freely between the assembler and the mining loops.
//! Extending the chain creates a new node; existing nodes never change.

use std::sync::Arc;

use primitive_types::H256;

use super::entities::BlockHeader;

/// Number of previous headers used for the median time past
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Immutable chain position
#[derive(Debug)]
pub struct ChainedHeader {
    /// Block header
    pub header: BlockHeader,

    /// Cached header hash
    pub hash: H256,

    /// Height (genesis is 0)
    pub height: u32,

    /// Whether the block at this position is proof-of-stake
    pub proof_of_stake: bool,

    previous: Option<Arc<ChainedHeader>>,
}

impl ChainedHeader {
    /// Genesis position
    pub fn genesis(header: BlockHeader, proof_of_stake: bool) -> Arc<Self> {
        Arc::new(Self {
            hash: header.hash(),
            header,
            height: 0,
            proof_of_stake,
            previous: None,
        })
    }

    /// New tip on top of `self`. The header's `prev_hash` is overwritten
    /// with this node's hash.
    pub fn extend(self: &Arc<Self>, mut header: BlockHeader, proof_of_stake: bool) -> Arc<Self> {
        header.prev_hash = self.hash;
        Arc::new(Self {
            hash: header.hash(),
            header,
            height: self.height + 1,
            proof_of_stake,
            previous: Some(Arc::clone(self)),
        })
    }

    /// Predecessor, `None` at genesis
    pub fn previous(&self) -> Option<&ChainedHeader> {
        self.previous.as_deref()
    }

    /// Header time
    pub fn time(&self) -> u32 {
        self.header.time
    }

    /// Walk back from this node (inclusive) towards genesis
    pub fn iter(&self) -> Ancestors<'_> {
        Ancestors { next: Some(self) }
    }

    /// Ancestor at `height`, or `None` above this node
    pub fn ancestor(&self, height: u32) -> Option<&ChainedHeader> {
        if height > self.height {
            return None;
        }
        self.iter().find(|h| h.height == height)
    }

    /// Median of the last 11 header times (inclusive)
    pub fn median_time_past(&self) -> u32 {
        let mut times: Vec<u32> = self.iter().take(MEDIAN_TIME_SPAN).map(|h| h.time()).collect();
        times.sort_unstable();
        times[times.len() / 2]
    }
}

impl Drop for ChainedHeader {
    // Unlink iteratively so dropping a long chain does not recurse per node.
    fn drop(&mut self) {
        let mut previous = self.previous.take();
        while let Some(node) = previous {
            match Arc::try_unwrap(node) {
                Ok(mut owned) => previous = owned.previous.take(),
                Err(_) => break,
            }
        }
    }
}

/// Iterator from a chain position back to genesis
pub struct Ancestors<'a> {
    next: Option<&'a ChainedHeader>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a ChainedHeader;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.previous();
        Some(current)
    }
}
