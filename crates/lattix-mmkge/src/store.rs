//! Embedding tables.
//!
//! Four tables, all registered as trainable variables in the model's
//! [`VarMap`]:
//!
//! | Name | Shape | Init |
//! |------|-------|------|
//! | `entity_embeddings` | `[ent_tot, 2 * dim]` | uniform `±entity_range` |
//! | `relation_embeddings` | `[rel_tot, dim]` | uniform `±relation_range` |
//! | `visual_embeddings` | `[ent_tot, img_dim]` | copy of the pretrained snapshot |
//! | `textual_embeddings` | `[ent_tot, text_dim]` | copy of the pretrained snapshot |
//!
//! Pretrained tables are plain variables: they start from the snapshot and
//! are updated by the optimizer like everything else. Their shapes never
//! change.

use crate::error::{Error, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

pub const ENTITY_TABLE: &str = "entity_embeddings";
pub const RELATION_TABLE: &str = "relation_embeddings";
pub const VISUAL_TABLE: &str = "visual_embeddings";
pub const TEXTUAL_TABLE: &str = "textual_embeddings";

/// Index-addressed embedding tables.
#[derive(Debug, Clone)]
pub struct EmbeddingStore {
    entities: Tensor,
    relations: Tensor,
    visual: Tensor,
    textual: Tensor,
    device: Device,
}

impl EmbeddingStore {
    /// Create the four tables and register them in `varmap`.
    ///
    /// # Arguments
    /// - `entity_range` / `relation_range`: uniform init bounds
    /// - `visual` / `textual`: pretrained snapshots, `[ent_tot, *]`
    /// - `seed`: seed for the structural and relation tables
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        varmap: &VarMap,
        ent_tot: usize,
        rel_tot: usize,
        dim: usize,
        entity_range: f32,
        relation_range: f32,
        visual: &Tensor,
        textual: &Tensor,
        seed: u64,
        device: &Device,
    ) -> Result<Self> {
        check_pretrained("visual", visual, ent_tot)?;
        check_pretrained("textual", textual, ent_tot)?;

        let mut rng = StdRng::seed_from_u64(seed);
        let entities = uniform_table(&mut rng, ent_tot, 2 * dim, entity_range, device)?;
        let relations = uniform_table(&mut rng, rel_tot, dim, relation_range, device)?;
        let visual = visual.to_dtype(DType::F32)?.to_device(device)?;
        let textual = textual.to_dtype(DType::F32)?.to_device(device)?;

        let store = Self {
            entities: register(varmap, ENTITY_TABLE, &entities)?,
            relations: register(varmap, RELATION_TABLE, &relations)?,
            visual: register(varmap, VISUAL_TABLE, &visual)?,
            textual: register(varmap, TEXTUAL_TABLE, &textual)?,
            device: device.clone(),
        };
        debug!(
            ent_tot,
            rel_tot,
            dim,
            img_dim = store.visual_dim(),
            text_dim = store.textual_dim(),
            "embedding store ready"
        );
        Ok(store)
    }

    /// Structural rows, `[ids.len(), 2 * dim]`.
    pub fn structural(&self, ids: &[usize]) -> Result<Tensor> {
        self.lookup_entities(&self.entities, ids)
    }

    /// Relation rows, `[ids.len(), dim]`.
    pub fn relation(&self, ids: &[usize]) -> Result<Tensor> {
        let count = self.num_relations();
        if let Some(&index) = ids.iter().find(|&&i| i >= count) {
            return Err(Error::RelationOutOfRange { index, count });
        }
        let ids = self.index_tensor(ids)?;
        Ok(self.relations.index_select(&ids, 0)?)
    }

    /// Raw visual rows, `[ids.len(), img_dim]`.
    pub fn visual(&self, ids: &[usize]) -> Result<Tensor> {
        self.lookup_entities(&self.visual, ids)
    }

    /// Raw textual rows, `[ids.len(), text_dim]`.
    pub fn textual(&self, ids: &[usize]) -> Result<Tensor> {
        self.lookup_entities(&self.textual, ids)
    }

    pub fn num_entities(&self) -> usize {
        self.entities.dims()[0]
    }

    pub fn num_relations(&self) -> usize {
        self.relations.dims()[0]
    }

    pub fn entity_dim(&self) -> usize {
        self.entities.dims()[1]
    }

    pub fn relation_dim(&self) -> usize {
        self.relations.dims()[1]
    }

    pub fn visual_dim(&self) -> usize {
        self.visual.dims()[1]
    }

    pub fn textual_dim(&self) -> usize {
        self.textual.dims()[1]
    }

    fn lookup_entities(&self, table: &Tensor, ids: &[usize]) -> Result<Tensor> {
        let count = self.num_entities();
        if let Some(&index) = ids.iter().find(|&&i| i >= count) {
            return Err(Error::EntityOutOfRange { index, count });
        }
        let ids = self.index_tensor(ids)?;
        Ok(table.index_select(&ids, 0)?)
    }

    fn index_tensor(&self, ids: &[usize]) -> Result<Tensor> {
        let ids = ids
            .iter()
            .map(|&i| {
                u32::try_from(i).map_err(|_| {
                    Error::UnsupportedOperation(format!("index {i} does not fit in u32"))
                })
            })
            .collect::<Result<Vec<u32>>>()?;
        Ok(Tensor::new(ids.as_slice(), &self.device)?)
    }
}

fn check_pretrained(name: &str, table: &Tensor, ent_tot: usize) -> Result<()> {
    let dims = table.dims();
    if dims.len() != 2 {
        return Err(Error::mismatch(
            format!("{name} pretrained table rank"),
            2,
            dims.len(),
        ));
    }
    if dims[0] != ent_tot {
        return Err(Error::mismatch(
            format!("{name} pretrained table rows"),
            ent_tot,
            dims[0],
        ));
    }
    Ok(())
}

fn uniform_table(
    rng: &mut StdRng,
    rows: usize,
    cols: usize,
    range: f32,
    device: &Device,
) -> Result<Tensor> {
    let values: Vec<f32> = (0..rows * cols)
        .map(|_| rng.random_range(-range..=range))
        .collect();
    Ok(Tensor::from_vec(values, (rows, cols), device)?)
}

/// Insert `init` as a new variable and return its tracked tensor.
pub(crate) fn register(varmap: &VarMap, name: &str, init: &Tensor) -> Result<Tensor> {
    let var = Var::from_tensor(init)?;
    let tensor = var.as_tensor().clone();
    varmap
        .data()
        .lock()
        .map_err(|_| Error::UnsupportedOperation("parameter map lock poisoned".into()))?
        .insert(name.to_string(), var);
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(ent_tot: usize, rel_tot: usize, dim: usize) -> (VarMap, EmbeddingStore) {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let visual = Tensor::arange(0f32, (ent_tot * 3) as f32, &device)
            .unwrap()
            .reshape((ent_tot, 3))
            .unwrap();
        let textual = Tensor::ones((ent_tot, 5), DType::F32, &device).unwrap();
        let store = EmbeddingStore::new(
            &varmap, ent_tot, rel_tot, dim, 0.5, 1.0, &visual, &textual, 42, &device,
        )
        .unwrap();
        (varmap, store)
    }

    #[test]
    fn test_shapes() {
        let (_, s) = store(6, 2, 4);
        assert_eq!(s.num_entities(), 6);
        assert_eq!(s.num_relations(), 2);
        assert_eq!(s.entity_dim(), 8);
        assert_eq!(s.relation_dim(), 4);
        assert_eq!(s.visual_dim(), 3);
        assert_eq!(s.textual_dim(), 5);
    }

    #[test]
    fn test_init_within_range() {
        let (_, s) = store(10, 3, 8);
        let ents = s.structural(&(0..10).collect::<Vec<_>>()).unwrap();
        for row in ents.to_vec2::<f32>().unwrap() {
            assert!(row.iter().all(|v| v.abs() <= 0.5));
        }
        let rels = s.relation(&[0, 1, 2]).unwrap();
        for row in rels.to_vec2::<f32>().unwrap() {
            assert!(row.iter().all(|v| v.abs() <= 1.0));
        }
    }

    #[test]
    fn test_lookup_preserves_order() {
        let (_, s) = store(4, 1, 2);
        let rows = s.visual(&[2, 0, 2]).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(rows[0], vec![6.0, 7.0, 8.0]);
        assert_eq!(rows[1], vec![0.0, 1.0, 2.0]);
        assert_eq!(rows[2], rows[0]);
    }

    #[test]
    fn test_out_of_range_fails() {
        let (_, s) = store(4, 2, 2);
        assert!(matches!(
            s.structural(&[0, 4]),
            Err(Error::EntityOutOfRange { index: 4, count: 4 })
        ));
        assert!(matches!(
            s.relation(&[2]),
            Err(Error::RelationOutOfRange { index: 2, count: 2 })
        ));
    }

    #[test]
    fn test_pretrained_row_mismatch_fails() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let visual = Tensor::zeros((3, 4), DType::F32, &device).unwrap();
        let textual = Tensor::zeros((4, 4), DType::F32, &device).unwrap();
        let err = EmbeddingStore::new(
            &varmap, 4, 1, 2, 0.5, 1.0, &visual, &textual, 0, &device,
        )
        .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_tables_registered_as_vars() {
        let (varmap, _) = store(3, 1, 2);
        assert_eq!(varmap.all_vars().len(), 4);
        let data = varmap.data().lock().unwrap();
        for name in [ENTITY_TABLE, RELATION_TABLE, VISUAL_TABLE, TEXTUAL_TABLE] {
            assert!(data.contains_key(name), "missing {name}");
        }
    }

    #[test]
    fn test_same_seed_same_tables() {
        let (_, a) = store(5, 2, 3);
        let (_, b) = store(5, 2, 3);
        let ids: Vec<usize> = (0..5).collect();
        assert_eq!(
            a.structural(&ids).unwrap().to_vec2::<f32>().unwrap(),
            b.structural(&ids).unwrap().to_vec2::<f32>().unwrap()
        );
    }
}
