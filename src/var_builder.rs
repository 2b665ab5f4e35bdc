use crate::Res;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Create a fresh trainable weight store and a builder over it.
///
/// Every parameter a model requests through the returned `VarBuilder` is
/// registered in the `VarMap`, which keeps ownership for the model's
/// lifetime (training mutates it; forward evaluation only reads).
pub fn trainable(dtype: DType, device: &Device) -> (VarMap, VarBuilder<'static>) {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, dtype, device);
    (varmap, vb)
}

/// Deterministically re-initialize every tensor registered in `varmap`.
///
/// Values are drawn from a ChaCha stream seeded with `seed`, visiting
/// tensors in sorted-name order so the assignment is independent of map
/// iteration order. Two models built from the same configuration and
/// reseeded with the same seed are bit-identical, on any backend. Call this
/// once, right after construction, before the first forward pass.
pub fn reseed(varmap: &VarMap, seed: u64) -> Res<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let data = varmap
        .data()
        .lock()
        .map_err(|e| candle_core::Error::Msg(e.to_string()))?;

    let mut names: Vec<String> = data.keys().cloned().collect();
    names.sort();

    for name in &names {
        let var = &data[name];
        let dims = var.dims().to_vec();
        let n: usize = dims.iter().product();
        let vals: Vec<f32> = (0..n).map(|_| rng.gen_range(-0.08f32..0.08)).collect();
        let t = Tensor::from_vec(vals, dims, var.device())?.to_dtype(var.dtype())?;
        var.set(&t)?;
    }

    Ok(())
}
