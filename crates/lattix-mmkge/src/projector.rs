//! Per-modality affine projections into the structural embedding space.

use crate::error::{Error, Result};
use candle_core::Tensor;
use candle_nn::{linear, Linear, Module, VarBuilder};
use tracing::debug;

/// Two independent linear maps: `img_dim -> out_dim` and `text_dim -> out_dim`.
///
/// The maps share nothing; each has its own weight and bias.
#[derive(Debug, Clone)]
pub struct ModalityProjector {
    visual: Linear,
    textual: Linear,
    visual_dim: usize,
    textual_dim: usize,
    out_dim: usize,
}

impl ModalityProjector {
    /// Create both projections under `vb` (`visual_proj.*`, `textual_proj.*`).
    pub fn new(visual_dim: usize, textual_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Self> {
        let visual = linear(visual_dim, out_dim, vb.pp("visual_proj"))?;
        let textual = linear(textual_dim, out_dim, vb.pp("textual_proj"))?;
        debug!(visual_dim, textual_dim, out_dim, "modality projections ready");
        Ok(Self {
            visual,
            textual,
            visual_dim,
            textual_dim,
            out_dim,
        })
    }

    /// `[batch, img_dim] -> [batch, out_dim]`
    pub fn project_visual(&self, xs: &Tensor) -> Result<Tensor> {
        check_width("visual projection input", xs, self.visual_dim)?;
        Ok(self.visual.forward(xs)?)
    }

    /// `[batch, text_dim] -> [batch, out_dim]`
    pub fn project_textual(&self, xs: &Tensor) -> Result<Tensor> {
        check_width("textual projection input", xs, self.textual_dim)?;
        Ok(self.textual.forward(xs)?)
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }
}

fn check_width(context: &str, xs: &Tensor, expected: usize) -> Result<()> {
    match xs.dims() {
        [_, width] if *width == expected => Ok(()),
        dims => Err(Error::mismatch(context, format!("[batch, {expected}]"), format!("{dims:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn projector() -> (VarMap, ModalityProjector) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let p = ModalityProjector::new(3, 5, 4, vb).unwrap();
        (varmap, p)
    }

    #[test]
    fn test_output_width() {
        let (_, p) = projector();
        let v = Tensor::ones((2, 3), DType::F32, &Device::Cpu).unwrap();
        let t = Tensor::ones((2, 5), DType::F32, &Device::Cpu).unwrap();
        assert_eq!(p.project_visual(&v).unwrap().dims(), &[2, 4]);
        assert_eq!(p.project_textual(&t).unwrap().dims(), &[2, 4]);
    }

    #[test]
    fn test_independent_parameters() {
        let (varmap, _) = projector();
        let data = varmap.data().lock().unwrap();
        assert_eq!(data["visual_proj.weight"].dims(), &[4, 3]);
        assert_eq!(data["textual_proj.weight"].dims(), &[4, 5]);
        assert!(data.contains_key("visual_proj.bias"));
        assert!(data.contains_key("textual_proj.bias"));
    }

    #[test]
    fn test_known_affine_map() {
        let (mut varmap, p) = projector();
        let dev = Device::Cpu;
        let w = Tensor::new(
            &[[1f32, 0., 0.], [0., 1., 0.], [0., 0., 1.], [1., 1., 1.]],
            &dev,
        )
        .unwrap();
        varmap.set_one("visual_proj.weight", &w).unwrap();
        varmap
            .set_one("visual_proj.bias", Tensor::new(&[0f32, 0., 0., 0.5], &dev).unwrap())
            .unwrap();

        let x = Tensor::new(&[[1f32, 2., 3.]], &dev).unwrap();
        let y = p.project_visual(&x).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(y[0], vec![1.0, 2.0, 3.0, 6.5]);
    }

    #[test]
    fn test_wrong_width_fails() {
        let (_, p) = projector();
        let v = Tensor::ones((2, 5), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            p.project_visual(&v),
            Err(Error::DimensionMismatch { .. })
        ));
    }
}
