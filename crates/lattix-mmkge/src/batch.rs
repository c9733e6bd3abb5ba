//! Index batches handed over by the negative sampler.
//!
//! A batch pairs three index columns with a [`CorruptionMode`] telling the
//! scorer which side of the triple carries the candidate entities.
//!
//! # Grouping contract
//!
//! With `R = relations.len()`, row `n` of `heads` (and of `tails`) is scored
//! against relation row `n % R`. Both entity columns must therefore hold a
//! multiple of `R` rows, and their group counts (`len / R`) must agree unless
//! one side is a single group that is broadcast against the other:
//!
//! ```text
//! relations: [r0, r1]
//! heads:     [h0, h1]                 -> 1 group
//! tails:     [t0, t1, t2, t3, t4, t5] -> 3 groups
//! scores:    [(h0,r0,t0), (h1,r1,t1), (h0,r0,t2), (h1,r1,t3), (h0,r0,t4), (h1,r1,t5)]
//! ```
//!
//! The rotational scorer checks this and fails with a dimension mismatch
//! instead of scrambling scores across candidates.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which side of the triple was corrupted when building negatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorruptionMode {
    /// Heads are the candidates; the relation rotates the tail back onto the head.
    HeadBatch,
    /// Tails are the candidates (also used for plain positive batches).
    #[default]
    TailBatch,
}

impl fmt::Display for CorruptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeadBatch => f.write_str("head_batch"),
            Self::TailBatch => f.write_str("tail_batch"),
        }
    }
}

impl FromStr for CorruptionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "head_batch" => Ok(Self::HeadBatch),
            // "normal" is what samplers emit for uncorrupted batches
            "tail_batch" | "normal" => Ok(Self::TailBatch),
            other => Err(Error::UnsupportedOperation(format!(
                "unknown corruption mode '{other}'"
            ))),
        }
    }
}

/// One of the three entity information sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Structural,
    Visual,
    Textual,
}

impl Modality {
    /// Fusion slot order.
    pub const ALL: [Modality; 3] = [Self::Structural, Self::Visual, Self::Textual];
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structural => f.write_str("structural"),
            Self::Visual => f.write_str("visual"),
            Self::Textual => f.write_str("textual"),
        }
    }
}

/// A batch of (head, relation, tail) indices.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TripleBatch {
    /// Head entity indices.
    pub heads: Vec<usize>,
    /// Relation indices, one per group row.
    pub relations: Vec<usize>,
    /// Tail entity indices.
    pub tails: Vec<usize>,
    /// Corrupted side.
    pub mode: CorruptionMode,
}

impl TripleBatch {
    pub fn new(
        heads: Vec<usize>,
        relations: Vec<usize>,
        tails: Vec<usize>,
        mode: CorruptionMode,
    ) -> Self {
        Self {
            heads,
            relations,
            tails,
            mode,
        }
    }

    /// A single triple in tail-batch layout.
    pub fn single(head: usize, relation: usize, tail: usize) -> Self {
        Self::new(vec![head], vec![relation], vec![tail], CorruptionMode::TailBatch)
    }

    /// Score `(head, relation, ?)` against every candidate tail.
    pub fn tail_candidates(head: usize, relation: usize, candidates: Vec<usize>) -> Self {
        Self::new(vec![head], vec![relation], candidates, CorruptionMode::TailBatch)
    }

    /// Score `(?, relation, tail)` against every candidate head.
    pub fn head_candidates(candidates: Vec<usize>, relation: usize, tail: usize) -> Self {
        Self::new(candidates, vec![relation], vec![tail], CorruptionMode::HeadBatch)
    }

    /// Builder-style mode override.
    pub fn with_mode(mut self, mode: CorruptionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Number of scores the batch produces.
    ///
    /// Only meaningful for batches that satisfy the grouping contract.
    pub fn num_scores(&self) -> usize {
        self.heads.len().max(self.tails.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("head_batch".parse::<CorruptionMode>().unwrap(), CorruptionMode::HeadBatch);
        assert_eq!("tail_batch".parse::<CorruptionMode>().unwrap(), CorruptionMode::TailBatch);
        assert_eq!("normal".parse::<CorruptionMode>().unwrap(), CorruptionMode::TailBatch);
        assert!("sideways".parse::<CorruptionMode>().is_err());
    }

    #[test]
    fn test_mode_display_roundtrip() {
        for mode in [CorruptionMode::HeadBatch, CorruptionMode::TailBatch] {
            assert_eq!(mode.to_string().parse::<CorruptionMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_mode_serde_names() {
        let json = serde_json::to_string(&CorruptionMode::HeadBatch).unwrap();
        assert_eq!(json, "\"head_batch\"");
    }

    #[test]
    fn test_candidate_batches() {
        let b = TripleBatch::tail_candidates(0, 2, vec![1, 2, 3]);
        assert_eq!(b.mode, CorruptionMode::TailBatch);
        assert_eq!(b.num_scores(), 3);

        let b = TripleBatch::head_candidates(vec![4, 5], 1, 0);
        assert_eq!(b.mode, CorruptionMode::HeadBatch);
        assert_eq!(b.heads, vec![4, 5]);
        assert_eq!(b.tails, vec![0]);
    }
}
