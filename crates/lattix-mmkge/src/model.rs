//! AdvMixRotatE: multimodal RotatE with adversarial fake-modality scoring.
//!
//! The wrapper wires the four components together:
//!
//! ```text
//! indices ──> EmbeddingStore ──> ModalityProjector ──> AttentionFusion ──┐
//!                  │ (relation rows)                     (head, tail)    │
//!                  └──────────────────────────────> RotationalScorer <───┘
//!                                                          │
//!                                                 margin − distance
//! ```
//!
//! Joint embeddings are recomputed on every call and never cached, so every
//! score reflects the current parameter values.
//!
//! # Parameters
//!
//! Trainable parameters live in a [`VarMap`] (see [`AdvMixRotatE::parameters`])
//! so an external optimizer can take `varmap.all_vars()`. The margin and the
//! two embedding ranges are fixed scalars kept outside the map; they only
//! appear in the exported bundle ([`AdvMixRotatE::state_dict`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use lattix_mmkge::{AdvMixRotatE, ModelConfig, TripleBatch};
//!
//! let model = AdvMixRotatE::builder(ent_tot, rel_tot)
//!     .with_config(ModelConfig::default().with_dim(250))
//!     .with_visual(visual)      // [ent_tot, img_dim]
//!     .with_textual(textual)    // [ent_tot, text_dim]
//!     .build()?;
//!
//! let score = model.score(&TripleBatch::single(0, 3, 7))?;
//! ```

use crate::batch::{CorruptionMode, Modality, TripleBatch};
use crate::config::ModelConfig;
use crate::error::{Error, Result};
use crate::fusion::AttentionFusion;
use crate::projector::ModalityProjector;
use crate::rotate::RotationalScorer;
use crate::store::EmbeddingStore;
use crate::TripleScorer;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info, trace, warn};

pub const MARGIN: &str = "margin";
pub const ENTITY_RANGE: &str = "entity_embedding_range";
pub const RELATION_RANGE: &str = "relation_embedding_range";

/// Joint head, relation and joint tail tensors of one forward pass.
#[derive(Debug, Clone)]
pub struct TripleEmbeddings {
    /// Joint heads, `[Bh, 2 * dim]`.
    pub head: Tensor,
    /// Relation rows, `[R, dim]`.
    pub relation: Tensor,
    /// Joint tails, `[Bt, 2 * dim]`.
    pub tail: Tensor,
}

/// The three per-modality views of a set of entities, all `[batch, 2 * dim]`.
#[derive(Debug, Clone)]
pub struct ModalityEmbeddings {
    pub structural: Tensor,
    /// Projected visual vectors.
    pub visual: Tensor,
    /// Projected textual vectors.
    pub textual: Tensor,
}

/// Substitute visual/textual vectors produced by an adversarial generator.
///
/// Vectors live in the joint space (`[rows, 2 * dim]`, already projected).
/// All four are required by [`AdvMixRotatE::fake_score`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeModalities<'a> {
    pub head_visual: Option<&'a Tensor>,
    pub tail_visual: Option<&'a Tensor>,
    pub head_textual: Option<&'a Tensor>,
    pub tail_textual: Option<&'a Tensor>,
}

impl<'a> FakeModalities<'a> {
    /// All four substitutes present.
    pub fn new(
        head_visual: &'a Tensor,
        tail_visual: &'a Tensor,
        head_textual: &'a Tensor,
        tail_textual: &'a Tensor,
    ) -> Self {
        Self {
            head_visual: Some(head_visual),
            tail_visual: Some(tail_visual),
            head_textual: Some(head_textual),
            tail_textual: Some(tail_textual),
        }
    }

    fn require(&self) -> Result<(&'a Tensor, &'a Tensor, &'a Tensor, &'a Tensor)> {
        let missing = |name: &'static str| {
            warn!(missing = name, "rejecting partial modality substitution");
            Error::PartialSubstitution(name)
        };
        Ok((
            self.head_visual.ok_or_else(|| missing("head_visual"))?,
            self.tail_visual.ok_or_else(|| missing("tail_visual"))?,
            self.head_textual.ok_or_else(|| missing("head_textual"))?,
            self.tail_textual.ok_or_else(|| missing("tail_textual"))?,
        ))
    }
}

/// Scores of the adversarial path, each `margin − distance`.
#[derive(Debug, Clone)]
pub struct FakeScores {
    /// Fake head fusion against the real tail.
    pub fake_head: Tensor,
    /// Real head against the fake tail fusion.
    pub fake_tail: Tensor,
    /// Fake head against fake tail.
    pub fake_both: Tensor,
}

/// Attention over (structural, visual, textual) for one head/tail pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttentionWeights {
    pub head: [f32; 3],
    pub tail: [f32; 3],
}

impl AttentionWeights {
    pub fn head_weight(&self, modality: Modality) -> f32 {
        self.head[slot(modality)]
    }

    pub fn tail_weight(&self, modality: Modality) -> f32 {
        self.tail[slot(modality)]
    }
}

fn slot(modality: Modality) -> usize {
    // ALL lists every variant
    Modality::ALL
        .iter()
        .position(|m| *m == modality)
        .unwrap_or_default()
}

/// Builder for [`AdvMixRotatE`].
pub struct AdvMixRotatEBuilder {
    ent_tot: usize,
    rel_tot: usize,
    config: ModelConfig,
    visual: Option<Tensor>,
    textual: Option<Tensor>,
    device: Device,
}

impl AdvMixRotatEBuilder {
    pub fn with_config(mut self, config: ModelConfig) -> Self {
        self.config = config;
        self
    }

    /// Pretrained visual table, `[ent_tot, img_dim]`.
    pub fn with_visual(mut self, visual: Tensor) -> Self {
        self.visual = Some(visual);
        self
    }

    /// Pretrained textual table, `[ent_tot, text_dim]`.
    pub fn with_textual(mut self, textual: Tensor) -> Self {
        self.textual = Some(textual);
        self
    }

    pub fn with_device(mut self, device: &Device) -> Self {
        self.device = device.clone();
        self
    }

    /// Allocate and initialize all parameters.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingModality`] if either pretrained table is absent
    /// - [`Error::DimensionMismatch`] if a table is not `[ent_tot, *]`
    /// - [`Error::InvalidConfig`] for an invalid config or empty vocabulary
    pub fn build(self) -> Result<AdvMixRotatE> {
        let visual = self.visual.ok_or(Error::MissingModality(Modality::Visual))?;
        let textual = self.textual.ok_or(Error::MissingModality(Modality::Textual))?;
        let config = self.config;
        config.validate()?;
        if self.ent_tot == 0 || self.rel_tot == 0 {
            return Err(Error::InvalidConfig(format!(
                "need at least one entity and one relation, got {} and {}",
                self.ent_tot, self.rel_tot
            )));
        }

        let device = self.device;
        let varmap = VarMap::new();
        let entity_range = config.entity_embedding_range();
        let relation_range = config.relation_embedding_range();

        let store = EmbeddingStore::new(
            &varmap,
            self.ent_tot,
            self.rel_tot,
            config.dim,
            entity_range,
            relation_range,
            &visual,
            &textual,
            config.seed,
            &device,
        )?;
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let projector = ModalityProjector::new(
            store.visual_dim(),
            store.textual_dim(),
            config.entity_dim(),
            vb.clone(),
        )?;
        let fusion = AttentionFusion::new(config.entity_dim(), vb.pp("entity_attn"))?;
        let margin = Tensor::new(&[config.margin], &device)?;

        debug!(
            ent_tot = self.ent_tot,
            rel_tot = self.rel_tot,
            dim = config.dim,
            projected_dim = projector.out_dim(),
            fused_dim = fusion.dim(),
            margin = config.margin,
            entity_range,
            relation_range,
            "built AdvMixRotatE"
        );

        Ok(AdvMixRotatE {
            config,
            store,
            projector,
            fusion,
            scorer: RotationalScorer::new(relation_range),
            margin,
            entity_range,
            varmap,
            device,
        })
    }
}

/// Multimodal RotatE with attention fusion.
pub struct AdvMixRotatE {
    config: ModelConfig,
    store: EmbeddingStore,
    projector: ModalityProjector,
    fusion: AttentionFusion,
    scorer: RotationalScorer,
    /// `[1]`, never part of the trainable set.
    margin: Tensor,
    entity_range: f32,
    varmap: VarMap,
    device: Device,
}

impl fmt::Debug for AdvMixRotatE {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvMixRotatE")
            .field("num_entities", &self.store.num_entities())
            .field("num_relations", &self.store.num_relations())
            .field("dim", &self.config.dim)
            .field("visual_dim", &self.store.visual_dim())
            .field("textual_dim", &self.store.textual_dim())
            .field("margin", &self.config.margin)
            .field("device", &self.device)
            .finish()
    }
}

impl AdvMixRotatE {
    /// Start building a model over `ent_tot` entities and `rel_tot` relations.
    pub fn builder(ent_tot: usize, rel_tot: usize) -> AdvMixRotatEBuilder {
        AdvMixRotatEBuilder {
            ent_tot,
            rel_tot,
            config: ModelConfig::default(),
            visual: None,
            textual: None,
            device: Device::Cpu,
        }
    }

    // =========================================================================
    // Scoring
    // =========================================================================

    /// `margin − distance` per triple; higher is more plausible.
    pub fn score(&self, batch: &TripleBatch) -> Result<Tensor> {
        Ok(self.score_with_embeddings(batch)?.0)
    }

    /// Like [`score`](Self::score), also returning the graph-connected joint
    /// head, relation and joint tail tensors.
    pub fn score_with_embeddings(&self, batch: &TripleBatch) -> Result<(Tensor, TripleEmbeddings)> {
        trace!(triples = batch.num_scores(), mode = %batch.mode, "scoring batch");
        let head = self.joint_embeddings(&batch.heads)?;
        let tail = self.joint_embeddings(&batch.tails)?;
        let relation = self.store.relation(&batch.relations)?;
        let score = self.plausibility(&head, &tail, &relation, batch.mode)?;
        Ok((score, TripleEmbeddings { head, relation, tail }))
    }

    /// Adversarial scores with generator-supplied visual/textual vectors.
    ///
    /// Returns the three comparative scores and the fake joint head,
    /// relation and fake joint tail.
    ///
    /// # Errors
    ///
    /// [`Error::PartialSubstitution`] if any of the four substitutes is absent;
    /// there is no fallback to the real vectors.
    pub fn fake_score(
        &self,
        batch: &TripleBatch,
        fakes: &FakeModalities<'_>,
    ) -> Result<(FakeScores, TripleEmbeddings)> {
        let (head_visual, tail_visual, head_textual, tail_textual) = fakes.require()?;

        let head = self.multimodal_embeddings(&batch.heads)?;
        let tail = self.multimodal_embeddings(&batch.tails)?;
        let relation = self.store.relation(&batch.relations)?;

        let head_joint = self.fusion.fuse(&head.structural, &head.visual, &head.textual)?;
        let tail_joint = self.fusion.fuse(&tail.structural, &tail.visual, &tail.textual)?;
        let head_fake = self.fusion.fuse(&head.structural, head_visual, head_textual)?;
        let tail_fake = self.fusion.fuse(&tail.structural, tail_visual, tail_textual)?;

        let scores = FakeScores {
            fake_head: self.plausibility(&head_fake, &tail_joint, &relation, batch.mode)?,
            fake_tail: self.plausibility(&head_joint, &tail_fake, &relation, batch.mode)?,
            fake_both: self.plausibility(&head_fake, &tail_fake, &relation, batch.mode)?,
        };
        Ok((
            scores,
            TripleEmbeddings {
                head: head_fake,
                relation,
                tail: tail_fake,
            },
        ))
    }

    /// L2 penalty: mean of the mean-squared raw head, tail and relation rows.
    pub fn regularization(&self, batch: &TripleBatch) -> Result<Tensor> {
        let h = self.store.structural(&batch.heads)?;
        let t = self.store.structural(&batch.tails)?;
        let r = self.store.relation(&batch.relations)?;
        let total = h
            .sqr()?
            .mean_all()?
            .add(&t.sqr()?.mean_all()?)?
            .add(&r.sqr()?.mean_all()?)?;
        Ok((total / 3.0)?)
    }

    /// Ranking scores, lower is more plausible. Detached from the graph.
    pub fn predict(&self, batch: &TripleBatch) -> Result<Vec<f32>> {
        Ok(self.score(batch)?.neg()?.to_vec1::<f32>()?)
    }

    /// Rotational distance (no margin) of precomputed embeddings, tail-batch layout.
    pub fn distance_from_embeddings(&self, embeddings: &TripleEmbeddings) -> Result<Tensor> {
        self.scorer.distance(
            &embeddings.head,
            &embeddings.tail,
            &embeddings.relation,
            CorruptionMode::TailBatch,
        )
    }

    fn plausibility(
        &self,
        head: &Tensor,
        tail: &Tensor,
        relation: &Tensor,
        mode: CorruptionMode,
    ) -> Result<Tensor> {
        let distance = self.scorer.distance(head, tail, relation, mode)?;
        Ok(self.margin.broadcast_sub(&distance)?)
    }

    // =========================================================================
    // Embeddings and diagnostics
    // =========================================================================

    /// Fused entity embeddings, `[ids.len(), 2 * dim]`.
    pub fn joint_embeddings(&self, ids: &[usize]) -> Result<Tensor> {
        let m = self.multimodal_embeddings(ids)?;
        self.fusion.fuse(&m.structural, &m.visual, &m.textual)
    }

    /// Raw structural rows.
    pub fn structural_embeddings(&self, ids: &[usize]) -> Result<Tensor> {
        self.store.structural(ids)
    }

    /// Projected visual rows.
    pub fn visual_embeddings(&self, ids: &[usize]) -> Result<Tensor> {
        self.projector.project_visual(&self.store.visual(ids)?)
    }

    /// Projected textual rows.
    pub fn textual_embeddings(&self, ids: &[usize]) -> Result<Tensor> {
        self.projector.project_textual(&self.store.textual(ids)?)
    }

    pub fn multimodal_embeddings(&self, ids: &[usize]) -> Result<ModalityEmbeddings> {
        Ok(ModalityEmbeddings {
            structural: self.structural_embeddings(ids)?,
            visual: self.visual_embeddings(ids)?,
            textual: self.textual_embeddings(ids)?,
        })
    }

    /// Attention weights, `[ids.len(), 3]`.
    pub fn attention(&self, ids: &[usize]) -> Result<Tensor> {
        let m = self.multimodal_embeddings(ids)?;
        self.fusion.attention(&m.structural, &m.visual, &m.textual)
    }

    /// Attention weights of a single head/tail pair.
    pub fn attention_weights(&self, head: usize, tail: usize) -> Result<AttentionWeights> {
        Ok(AttentionWeights {
            head: self.single_attention(head)?,
            tail: self.single_attention(tail)?,
        })
    }

    fn single_attention(&self, entity: usize) -> Result<[f32; 3]> {
        let weights = self.attention(&[entity])?.squeeze(0)?.to_vec1::<f32>()?;
        <[f32; 3]>::try_from(weights.as_slice())
            .map_err(|_| Error::mismatch("attention weights", 3, weights.len()))
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    /// Trainable parameters.
    pub fn parameters(&self) -> &VarMap {
        &self.varmap
    }

    /// Trainable variables, for an optimizer.
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.varmap.all_vars()
    }

    /// Snapshot of every parameter, including the three fixed scalars.
    pub fn state_dict(&self) -> Result<HashMap<String, Tensor>> {
        let mut bundle = HashMap::new();
        for (name, var) in self.lock_vars()?.iter() {
            bundle.insert(name.clone(), var.as_tensor().copy()?);
        }
        bundle.insert(MARGIN.to_string(), self.margin.copy()?);
        bundle.insert(
            ENTITY_RANGE.to_string(),
            Tensor::new(&[self.entity_range], &self.device)?,
        );
        bundle.insert(
            RELATION_RANGE.to_string(),
            Tensor::new(&[self.scorer.relation_range()], &self.device)?,
        );
        Ok(bundle)
    }

    /// Restore from a bundle produced by [`state_dict`](Self::state_dict).
    ///
    /// Every trainable parameter and the three fixed scalars must be present
    /// with matching shapes. Extra entries are ignored. The bundle is checked
    /// in full before anything is written, so a failed load leaves the model
    /// unchanged.
    pub fn load_state_dict(&mut self, bundle: &HashMap<String, Tensor>) -> Result<()> {
        let margin = scalar(bundle, MARGIN)?;
        let entity_range = scalar(bundle, ENTITY_RANGE)?;
        let relation_range = scalar(bundle, RELATION_RANGE)?;

        {
            let vars = self.lock_vars()?;
            let staged = vars
                .iter()
                .map(|(name, var)| {
                    let value = bundle.get(name).ok_or_else(|| {
                        Error::NotFound(format!("parameter '{name}' in checkpoint"))
                    })?;
                    Ok((var, conform(name, var, value, &self.device)?))
                })
                .collect::<Result<Vec<_>>>()?;
            for (var, value) in staged {
                var.set(&value)?;
            }
        }

        self.margin = Tensor::new(&[margin], &self.device)?;
        self.config.margin = margin;
        self.entity_range = entity_range;
        self.scorer = RotationalScorer::new(relation_range);
        Ok(())
    }

    /// Overwrite one trainable parameter in place.
    pub fn set_parameter(&mut self, name: &str, value: &Tensor) -> Result<()> {
        let vars = self.lock_vars()?;
        let var = vars
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("parameter '{name}'")))?;
        var.set(&conform(name, var, value, &self.device)?)?;
        Ok(())
    }

    /// Write [`state_dict`](Self::state_dict) as safetensors.
    pub fn save_checkpoint(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bundle = self.state_dict()?;
        candle_core::safetensors::save(&bundle, path)?;
        info!(path = %path.display(), tensors = bundle.len(), "saved checkpoint");
        Ok(())
    }

    /// Restore from a safetensors file written by [`save_checkpoint`](Self::save_checkpoint).
    pub fn load_checkpoint(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let bundle = candle_core::safetensors::load(path, &self.device)?;
        self.load_state_dict(&bundle)?;
        info!(path = %path.display(), tensors = bundle.len(), "restored checkpoint");
        Ok(())
    }

    fn lock_vars(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Var>>> {
        self.varmap
            .data()
            .lock()
            .map_err(|_| Error::UnsupportedOperation("parameter map lock poisoned".into()))
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn margin(&self) -> f32 {
        self.config.margin
    }

    pub fn entity_embedding_range(&self) -> f32 {
        self.entity_range
    }

    pub fn relation_embedding_range(&self) -> f32 {
        self.scorer.relation_range()
    }

    pub fn visual_dim(&self) -> usize {
        self.store.visual_dim()
    }

    pub fn textual_dim(&self) -> usize {
        self.store.textual_dim()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// `value` as an f32 tensor on `device`, if its shape matches `var`.
fn conform(name: &str, var: &Var, value: &Tensor, device: &Device) -> Result<Tensor> {
    if var.dims() != value.dims() {
        return Err(Error::mismatch(
            format!("parameter '{name}'"),
            format!("{:?}", var.dims()),
            format!("{:?}", value.dims()),
        ));
    }
    Ok(value.to_dtype(DType::F32)?.to_device(device)?)
}

fn scalar(bundle: &HashMap<String, Tensor>, name: &str) -> Result<f32> {
    let values = bundle
        .get(name)
        .ok_or_else(|| Error::NotFound(format!("scalar '{name}' in checkpoint")))?
        .flatten_all()?
        .to_dtype(DType::F32)?
        .to_vec1::<f32>()?;
    match values.as_slice() {
        [v] => Ok(*v),
        other => Err(Error::mismatch(format!("scalar '{name}'"), 1, other.len())),
    }
}

impl TripleScorer for AdvMixRotatE {
    fn score_triple(&self, head: usize, relation: usize, tail: usize) -> Result<f32> {
        let scores = self.score(&TripleBatch::single(head, relation, tail))?.to_vec1::<f32>()?;
        scores
            .first()
            .copied()
            .ok_or_else(|| Error::mismatch("single triple score", 1, 0))
    }

    fn predict_tail(&self, head: usize, relation: usize, k: usize) -> Result<Vec<(usize, f32)>> {
        let candidates: Vec<usize> = (0..self.num_entities()).collect();
        let batch = TripleBatch::tail_candidates(head, relation, candidates);
        Ok(top_k(self.score(&batch)?.to_vec1::<f32>()?, k))
    }

    fn predict_head(&self, relation: usize, tail: usize, k: usize) -> Result<Vec<(usize, f32)>> {
        let candidates: Vec<usize> = (0..self.num_entities()).collect();
        let batch = TripleBatch::head_candidates(candidates, relation, tail);
        Ok(top_k(self.score(&batch)?.to_vec1::<f32>()?, k))
    }

    fn num_entities(&self) -> usize {
        self.store.num_entities()
    }

    fn num_relations(&self) -> usize {
        self.store.num_relations()
    }

    fn embedding_dim(&self) -> usize {
        self.store.entity_dim()
    }
}

fn top_k(scores: Vec<f32>, k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(k);
    ranked
}
