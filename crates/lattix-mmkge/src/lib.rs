//! Multimodal knowledge graph embeddings.
//!
//! Knowledge graphs store facts as (head, relation, tail) triples. Many
//! entities also come with side information: a picture, a description.
//! `lattix-mmkge` learns one vector per entity that blends all three sources
//! and scores triples with a rotation in complex space.
//!
//! ## The Model
//!
//! Each entity has three views of the same width `2 * dim`:
//!
//! | View | Source | Parameters |
//! |------|--------|------------|
//! | structural | learned table | `[ent_tot, 2 * dim]` |
//! | visual | pretrained table, fine-tuned | `[ent_tot, img_dim]` + linear `img_dim -> 2 * dim` |
//! | textual | pretrained table, fine-tuned | `[ent_tot, text_dim]` + linear `text_dim -> 2 * dim` |
//!
//! An attention unit turns the three views into one **joint embedding**:
//!
//! ```text
//! alpha = softmax_m( w · tanh(e_m) )      m ∈ {structural, visual, textual}
//! joint = Σ_m alpha_m · e_m
//! ```
//!
//! Triples are scored RotatE-style ([Sun et al. 2019](https://arxiv.org/abs/1902.10197)):
//! the relation is an element-wise rotation `e^{iθ}` and
//!
//! ```text
//! score(h, r, t) = margin − Σ_k | joint(h)_k · r_k − joint(t)_k |
//! ```
//!
//! Higher is more plausible.
//!
//! ## Adversarial Path
//!
//! A generator (outside this crate) proposes fake visual/textual vectors.
//! [`AdvMixRotatE::fake_score`] fuses them in place of the real ones and
//! returns three scores (fake head, fake tail, both fake) so a trainer can
//! push the fusion unit to stay robust.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lattix_mmkge::{AdvMixRotatE, CorruptionMode, ModelConfig, TripleBatch};
//!
//! let model = AdvMixRotatE::builder(ent_tot, rel_tot)
//!     .with_config(ModelConfig::default().with_dim(100).with_margin(6.0))
//!     .with_visual(visual)
//!     .with_textual(textual)
//!     .build()?;
//!
//! // Positive triples plus tail-corrupted negatives
//! let batch = TripleBatch::new(heads, relations, tails, CorruptionMode::TailBatch);
//! let score = model.score(&batch)?;          // differentiable
//! let regul = model.regularization(&batch)?;
//!
//! // Ranking (lower is better)
//! let ranks = model.predict(&batch)?;
//! ```
//!
//! ## Out of Scope
//!
//! Data loading, negative sampling, the optimizer loop, the generator network
//! and ranking metrics are left to the caller. The model exposes its
//! trainable variables through [`AdvMixRotatE::parameters`] for any
//! `candle_nn` optimizer.
//!
//! ## References
//!
//! - Sun et al. (2019). "RotatE: Knowledge Graph Embedding by Relational
//!   Rotation in Complex Space." ICLR.

mod batch;
mod config;
mod error;
mod fusion;
mod model;
mod projector;
mod rotate;
mod store;

pub use batch::{CorruptionMode, Modality, TripleBatch};
pub use config::ModelConfig;
pub use error::{Error, Result};
pub use fusion::AttentionFusion;
pub use model::{
    AdvMixRotatE, AdvMixRotatEBuilder, AttentionWeights, FakeModalities, FakeScores,
    ModalityEmbeddings, TripleEmbeddings, ENTITY_RANGE, MARGIN, RELATION_RANGE,
};
pub use projector::ModalityProjector;
pub use rotate::RotationalScorer;
pub use store::{EmbeddingStore, ENTITY_TABLE, RELATION_TABLE, TEXTUAL_TABLE, VISUAL_TABLE};

/// Index-level scoring and link prediction.
///
/// Higher scores indicate more plausible triples.
pub trait TripleScorer {
    /// Score a single triple.
    fn score_triple(&self, head: usize, relation: usize, tail: usize) -> Result<f32>;

    /// Score multiple triples.
    fn score_triples(&self, triples: &[(usize, usize, usize)]) -> Result<Vec<f32>> {
        triples
            .iter()
            .map(|(h, r, t)| self.score_triple(*h, *r, *t))
            .collect()
    }

    /// Predict top-k tail entities for (head, relation, ?).
    fn predict_tail(&self, head: usize, relation: usize, k: usize) -> Result<Vec<(usize, f32)>>;

    /// Predict top-k head entities for (?, relation, tail).
    fn predict_head(&self, relation: usize, tail: usize, k: usize) -> Result<Vec<(usize, f32)>>;

    /// Number of entities.
    fn num_entities(&self) -> usize;

    /// Number of relations.
    fn num_relations(&self) -> usize;

    /// Entity embedding width.
    fn embedding_dim(&self) -> usize;
}
