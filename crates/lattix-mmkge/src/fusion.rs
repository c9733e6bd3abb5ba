//! Attention fusion of the three modality vectors of an entity.
//!
//! ```text
//! e     = stack(structural, visual, textual)   [batch, 3, d]
//! logit = w · tanh(e)                          [batch, 3]
//! alpha = softmax(logit)                       [batch, 3]
//! joint = Σ_m alpha_m · e_m                    [batch, d]
//! ```
//!
//! The scorer `w` is a single bias-free linear layer shared by all three
//! slots, so the weights depend only on each slot's content. The weighted sum
//! uses the stacked vectors *before* `tanh`.

use crate::error::{Error, Result};
use candle_core::{Tensor, D};
use candle_nn::{linear_no_bias, Linear, Module, VarBuilder};

/// Learned scalar attention over the structural, visual and textual slots.
#[derive(Debug, Clone)]
pub struct AttentionFusion {
    scorer: Linear,
    dim: usize,
}

impl AttentionFusion {
    /// Create the attention scorer (`weight: [1, dim]`) under `vb`.
    pub fn new(dim: usize, vb: VarBuilder) -> Result<Self> {
        let scorer = linear_no_bias(dim, 1, vb)?;
        Ok(Self { scorer, dim })
    }

    /// Fused joint embeddings, `[batch, dim]`.
    pub fn fuse(&self, structural: &Tensor, visual: &Tensor, textual: &Tensor) -> Result<Tensor> {
        Ok(self.fuse_with_weights(structural, visual, textual)?.0)
    }

    /// Attention weights, `[batch, 3]`, in [`Modality::ALL`](crate::Modality::ALL) order.
    pub fn attention(&self, structural: &Tensor, visual: &Tensor, textual: &Tensor) -> Result<Tensor> {
        let stacked = self.stack(structural, visual, textual)?;
        self.weights(&stacked)
    }

    /// Joint embeddings together with the weights that produced them.
    pub fn fuse_with_weights(
        &self,
        structural: &Tensor,
        visual: &Tensor,
        textual: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let stacked = self.stack(structural, visual, textual)?;
        let weights = self.weights(&stacked)?;
        let joint = weights
            .unsqueeze(D::Minus1)?
            .broadcast_mul(&stacked)?
            .sum(1)?;
        Ok((joint, weights))
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn stack(&self, structural: &Tensor, visual: &Tensor, textual: &Tensor) -> Result<Tensor> {
        let expected = structural.dims();
        match expected {
            [_, width] if *width == self.dim => {}
            dims => {
                return Err(Error::mismatch(
                    "structural fusion input",
                    format!("[batch, {}]", self.dim),
                    format!("{dims:?}"),
                ))
            }
        }
        for (name, t) in [("visual", visual), ("textual", textual)] {
            if t.dims() != expected {
                return Err(Error::mismatch(
                    format!("{name} fusion input"),
                    format!("{expected:?}"),
                    format!("{:?}", t.dims()),
                ));
            }
        }
        Ok(Tensor::stack(&[structural, visual, textual], 1)?)
    }

    fn weights(&self, stacked: &Tensor) -> Result<Tensor> {
        let logits = self.scorer.forward(&stacked.tanh()?)?.squeeze(D::Minus1)?;
        Ok(candle_nn::ops::softmax(&logits, D::Minus1)?)
    }
}
