use ndarray::prelude::*;
use tracing::trace;

#[tracing::instrument(name = "Converting embedding", level = "trace", skip(emb))]
pub fn embedding_to_ndarray(emb: &[f32]) -> Array1<f64> {
    let mut arr: Array1<f64> = Array1::<f64>::zeros(emb.len());
    trace!("Initialized ndarray with shape: {:?}", arr.dim());
    for (val, &src) in arr.iter_mut().zip(emb.iter()) {
        *val = src as f64;
    }
    arr
}
