//! RotatE distance in complex space.
//!
//! [Sun et al. 2019](https://arxiv.org/abs/1902.10197) models each relation
//! as an element-wise rotation `r = e^{iθ}`. Entities are complex vectors
//! stored as `[re | im]` halves of a real vector of width `2 * dim`.
//!
//! ```text
//! tail batch:  d = Σ_k | h_k · r_k − t_k |         (rotate head forward)
//! head batch:  d = Σ_k | conj(r_k) · t_k − h_k |   (rotate tail back)
//! ```
//!
//! More precisely, in head-batch mode the real and imaginary residuals are
//!
//! ```text
//! re = re_r · re_t + im_r · im_t − re_h
//! im = re_r · im_t − im_r · re_t − im_h
//! ```
//!
//! and in tail-batch mode
//!
//! ```text
//! re = re_h · re_r − im_h · im_r − re_t
//! im = re_h · im_r + im_h · re_r − im_t
//! ```
//!
//! The distance sums the modulus of each complex residual component; it is
//! not the Euclidean norm of the whole residual vector. A component with a
//! zero residual contributes zero gradient rather than `0 / 0`.
//!
//! # Phases
//!
//! Raw relation values are mapped to angles with
//! `θ = r · π / relation_embedding_range`, so the uniform init range covers
//! `[-π, π]`.
//!
//! # Grouping
//!
//! See [`TripleBatch`](crate::TripleBatch) for how entity rows are paired with
//! relation rows. The contract is checked before any arithmetic.

use crate::batch::CorruptionMode;
use crate::error::{Error, Result};
use candle_core::{Tensor, D};
use std::f64::consts::PI;

/// Rotational distance with a fixed phase scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationalScorer {
    relation_range: f32,
}

impl RotationalScorer {
    pub fn new(relation_range: f32) -> Self {
        Self { relation_range }
    }

    pub fn relation_range(&self) -> f32 {
        self.relation_range
    }

    /// Distance per triple, `[groups * relations]`, group-major.
    ///
    /// # Arguments
    /// - `head`: joint heads `[Bh, 2 * dim]`
    /// - `tail`: joint tails `[Bt, 2 * dim]`
    /// - `relation`: relation rows `[R, dim]`
    /// - `mode`: which side holds the candidates
    ///
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] when `Bh` or `Bt` is not a multiple of
    /// `R`, when the two group counts differ and neither is 1, or when the
    /// entity width is not twice the relation width.
    pub fn distance(
        &self,
        head: &Tensor,
        tail: &Tensor,
        relation: &Tensor,
        mode: CorruptionMode,
    ) -> Result<Tensor> {
        let layout = Layout::check(head, tail, relation)?;
        let dim = layout.dim;

        let phase = relation.affine(PI / self.relation_range as f64, 0.0)?;
        // [R, 1, dim]
        let re_r = phase.cos()?.unsqueeze(1)?;
        let im_r = phase.sin()?.unsqueeze(1)?;

        let re_h = layout.group(&head.narrow(D::Minus1, 0, dim)?, layout.head_groups)?;
        let im_h = layout.group(&head.narrow(D::Minus1, dim, dim)?, layout.head_groups)?;
        let re_t = layout.group(&tail.narrow(D::Minus1, 0, dim)?, layout.tail_groups)?;
        let im_t = layout.group(&tail.narrow(D::Minus1, dim, dim)?, layout.tail_groups)?;

        let (re, im) = match mode {
            CorruptionMode::HeadBatch => {
                let re = re_r
                    .broadcast_mul(&re_t)?
                    .add(&im_r.broadcast_mul(&im_t)?)?
                    .broadcast_sub(&re_h)?;
                let im = re_r
                    .broadcast_mul(&im_t)?
                    .sub(&im_r.broadcast_mul(&re_t)?)?
                    .broadcast_sub(&im_h)?;
                (re, im)
            }
            CorruptionMode::TailBatch => {
                let re = re_h
                    .broadcast_mul(&re_r)?
                    .sub(&im_h.broadcast_mul(&im_r)?)?
                    .broadcast_sub(&re_t)?;
                let im = re_h
                    .broadcast_mul(&im_r)?
                    .add(&im_h.broadcast_mul(&re_r)?)?
                    .broadcast_sub(&im_t)?;
                (re, im)
            }
        };

        // [2, R, G, dim] -> modulus -> [R, G]
        let squared = Tensor::stack(&[&re, &im], 0)?.sqr()?.sum(0)?;
        let score = modulus(&squared)?.sum(D::Minus1)?;
        Ok(score.t()?.flatten_all()?)
    }
}

/// `sqrt` with a zero derivative where the input is zero.
fn modulus(squared: &Tensor) -> Result<Tensor> {
    let zeros = squared.zeros_like()?;
    let nonzero = squared.gt(&zeros)?;
    let safe = nonzero.where_cond(squared, &squared.ones_like()?)?;
    Ok(nonzero.where_cond(&safe.sqrt()?, &zeros)?)
}

/// Validated batch geometry.
struct Layout {
    relations: usize,
    head_groups: usize,
    tail_groups: usize,
    dim: usize,
}

impl Layout {
    fn check(head: &Tensor, tail: &Tensor, relation: &Tensor) -> Result<Self> {
        let (relations, dim) = relation.dims2()?;
        if relations == 0 {
            return Err(Error::mismatch("relation rows", "at least 1", 0));
        }
        let (head_rows, head_width) = head.dims2()?;
        let (tail_rows, tail_width) = tail.dims2()?;
        for (side, width) in [("head", head_width), ("tail", tail_width)] {
            if width != 2 * dim {
                return Err(Error::mismatch(
                    format!("{side} embedding width (twice the relation width)"),
                    2 * dim,
                    width,
                ));
            }
        }
        for (side, rows) in [("head", head_rows), ("tail", tail_rows)] {
            if rows % relations != 0 || rows == 0 {
                return Err(Error::mismatch(
                    format!("{side} rows (a positive multiple of {relations} relation rows)"),
                    format!("k * {relations}"),
                    rows,
                ));
            }
        }
        let head_groups = head_rows / relations;
        let tail_groups = tail_rows / relations;
        if head_groups != tail_groups && head_groups != 1 && tail_groups != 1 {
            return Err(Error::mismatch(
                "candidate groups (equal, or one side a single group)",
                format!("{head_groups} head groups"),
                format!("{tail_groups} tail groups"),
            ));
        }
        Ok(Self {
            relations,
            head_groups,
            tail_groups,
            dim,
        })
    }

    /// `[groups * R, dim] -> [R, groups, dim]`
    fn group(&self, xs: &Tensor, groups: usize) -> Result<Tensor> {
        Ok(xs
            .reshape((groups, self.relations, self.dim))?
            .permute((1, 0, 2))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Var};

    fn t2(rows: &[&[f32]]) -> Tensor {
        let cols = rows[0].len();
        let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Tensor::from_vec(flat, (rows.len(), cols), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_zero_phase_is_euclidean_distance() {
        let scorer = RotationalScorer::new(1.0);
        let h = t2(&[&[1.0, 2.0]]);
        let t = t2(&[&[4.0, 6.0]]);
        let r = t2(&[&[0.0]]);
        let d = scorer
            .distance(&h, &t, &r, CorruptionMode::TailBatch)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(d.len(), 1);
        assert!((d[0] - 5.0).abs() < 1e-6);

        let d = scorer
            .distance(&h, &t, &r, CorruptionMode::HeadBatch)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!((d[0] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_quarter_turn() {
        // range 2.0, r = 1.0 -> θ = π/2, rotation by i
        let scorer = RotationalScorer::new(2.0);
        let h = t2(&[&[1.0, 0.0]]);
        let t = t2(&[&[0.0, 1.0]]);
        let r = t2(&[&[1.0]]);
        let forward = scorer
            .distance(&h, &t, &r, CorruptionMode::TailBatch)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!(forward[0].abs() < 1e-6);

        // head batch rotates the tail back by -θ: i * e^{-iπ/2} = 1
        let backward = scorer
            .distance(&h, &t, &r, CorruptionMode::HeadBatch)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!(backward[0].abs() < 1e-6);
    }

    #[test]
    fn test_sum_of_moduli_over_components() {
        let scorer = RotationalScorer::new(1.0);
        // two complex components: residuals (3 + 4i) and (0 + 1i)
        let h = t2(&[&[3.0, 0.0, 4.0, 1.0]]);
        let t = t2(&[&[0.0, 0.0, 0.0, 0.0]]);
        let r = t2(&[&[0.0, 0.0]]);
        let d = scorer
            .distance(&h, &t, &r, CorruptionMode::TailBatch)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!((d[0] - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_head_broadcast_against_tails() {
        let scorer = RotationalScorer::new(1.0);
        let h = t2(&[&[0.0, 0.0]]);
        let t = t2(&[&[1.0, 0.0], &[0.0, 2.0], &[3.0, 4.0]]);
        let r = t2(&[&[0.0]]);
        let d = scorer
            .distance(&h, &t, &r, CorruptionMode::TailBatch)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(d.len(), 3);
        for (got, want) in d.iter().zip([1.0, 2.0, 5.0]) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_group_major_output_order() {
        let scorer = RotationalScorer::new(1.0);
        // R = 2; heads one group, tails two groups
        let h = t2(&[&[0.0, 0.0], &[10.0, 0.0]]);
        let t = t2(&[&[1.0, 0.0], &[12.0, 0.0], &[3.0, 0.0], &[14.0, 0.0]]);
        let r = t2(&[&[0.0], &[0.0]]);
        let d = scorer
            .distance(&h, &t, &r, CorruptionMode::TailBatch)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        // (h0,t0) (h1,t1) (h0,t2) (h1,t3)
        for (got, want) in d.iter().zip([1.0, 2.0, 3.0, 4.0]) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_head_batch_group_major_output_order() {
        let scorer = RotationalScorer::new(1.0);
        // R = 2; heads two groups, tails one group
        let h = t2(&[&[1.0, 0.0], &[12.0, 0.0], &[3.0, 0.0], &[14.0, 0.0]]);
        let t = t2(&[&[0.0, 0.0], &[10.0, 0.0]]);
        let r = t2(&[&[0.0], &[0.0]]);
        let d = scorer
            .distance(&h, &t, &r, CorruptionMode::HeadBatch)
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        // (h0,t0) (h1,t1) (h2,t0) (h3,t1)
        assert_eq!(d.len(), 4);
        for (got, want) in d.iter().zip([1.0, 2.0, 3.0, 4.0]) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn test_zero_residual_has_zero_gradient() {
        let scorer = RotationalScorer::new(1.0);
        // first component matches exactly, second is off by 3 + 4i
        let head = Var::from_tensor(&t2(&[&[1.0, 3.0, 2.0, 4.0]])).unwrap();
        let t = t2(&[&[1.0, 0.0, 2.0, 0.0]]);
        let r = t2(&[&[0.0, 0.0]]);
        let d = scorer
            .distance(head.as_tensor(), &t, &r, CorruptionMode::TailBatch)
            .unwrap();
        assert!((d.to_vec1::<f32>().unwrap()[0] - 5.0).abs() < 1e-6);

        let grads = d.sum_all().unwrap().backward().unwrap();
        let g = grads.get(&head).unwrap().to_vec2::<f32>().unwrap();
        assert!(g[0].iter().all(|x| x.is_finite()));
        assert_eq!(g[0][0], 0.0);
        assert_eq!(g[0][2], 0.0);
        assert!((g[0][1] - 0.6).abs() < 1e-6);
        assert!((g[0][3] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_rows_not_multiple_of_relations_fails() {
        let scorer = RotationalScorer::new(1.0);
        let h = t2(&[&[0.0, 0.0], &[0.0, 0.0], &[0.0, 0.0]]);
        let r = t2(&[&[0.0], &[0.0]]);
        let err = scorer
            .distance(&h, &h, &r, CorruptionMode::TailBatch)
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_incompatible_groups_fail() {
        let scorer = RotationalScorer::new(1.0);
        let h = t2(&[&[0.0, 0.0], &[0.0, 0.0]]);
        let t = t2(&[&[0.0, 0.0], &[0.0, 0.0], &[0.0, 0.0]]);
        let r = t2(&[&[0.0]]);
        assert!(scorer.distance(&h, &t, &r, CorruptionMode::TailBatch).is_err());
    }

    #[test]
    fn test_width_mismatch_fails() {
        let scorer = RotationalScorer::new(1.0);
        let h = t2(&[&[0.0, 0.0, 0.0]]);
        let r = t2(&[&[0.0]]);
        assert!(matches!(
            scorer.distance(&h, &h, &r, CorruptionMode::TailBatch),
            Err(Error::DimensionMismatch { .. })
        ));
    }
}
