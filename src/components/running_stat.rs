use {
    candle_core::{
        Device,
        Tensor,
    },
    serde::{
        Deserialize,
        Serialize,
    },
};

/// Running mean and variance per dimension.
///
/// Batches are folded in with the parallel variance merge, so updating with
/// one big batch or many small ones gives the same result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningMeanStd {
    mean: Vec<f64>,
    var: Vec<f64>,
    count: f64,
}
impl RunningMeanStd {
    pub fn new(dim: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            var: vec![1.0; dim],
            count: 1e-4,
        }
    }

    pub fn from_parts(
        mean: Vec<f64>,
        var: Vec<f64>,
        count: f64,
    ) -> Self {
        Self {
            mean,
            var,
            count,
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn var(&self) -> &[f64] {
        &self.var
    }

    pub fn count(&self) -> f64 {
        self.count
    }

    pub fn std(&self) -> Vec<f64> {
        self.var.iter().map(|v| v.max(1e-4).sqrt()).collect()
    }

    /// Fold one sample into the statistics.
    pub fn update(
        &mut self,
        sample: &[f64],
    ) {
        self.update_batch(&[sample]);
    }

    /// Fold a batch of samples into the statistics.
    pub fn update_batch<S: AsRef<[f64]>>(
        &mut self,
        samples: &[S],
    ) {
        if samples.is_empty() {
            return;
        }
        let batch_count = samples.len() as f64;
        let dim = self.dim();

        let mut batch_mean = vec![0.0; dim];
        for sample in samples {
            for (m, x) in batch_mean.iter_mut().zip(sample.as_ref()) {
                *m += x / batch_count;
            }
        }
        let mut batch_var = vec![0.0; dim];
        for sample in samples {
            for ((v, m), x) in batch_var.iter_mut().zip(&batch_mean).zip(sample.as_ref()) {
                *v += (x - m).powi(2) / batch_count;
            }
        }

        let total = self.count + batch_count;
        for i in 0..dim {
            let delta = batch_mean[i] - self.mean[i];
            let m2 = self.var[i] * self.count
                + batch_var[i] * batch_count
                + delta.powi(2) * self.count * batch_count / total;
            self.mean[i] += delta * batch_count / total;
            self.var[i] = m2 / total;
        }
        self.count = total;
    }

    /// `clip((x - mean) / std, range)`
    pub fn normalize(
        &self,
        sample: &[f64],
        clip: (f64, f64),
    ) -> Vec<f64> {
        sample
            .iter()
            .zip(self.mean.iter().zip(self.std()))
            .map(|(x, (m, s))| ((x - m) / s).clamp(clip.0, clip.1))
            .collect()
    }

    /// The mean and std as tensors of the given (per-item) shape.
    pub fn tensors(
        &self,
        shape: &[usize],
        device: &Device,
    ) -> candle_core::Result<(Tensor, Tensor)> {
        Ok((
            Tensor::from_vec(self.mean.clone(), shape, device)?,
            Tensor::from_vec(self.std(), shape, device)?,
        ))
    }

    /// Normalize a batch tensor whose trailing dims match `shape`.
    pub fn normalize_tensor(
        &self,
        xs: &Tensor,
        shape: &[usize],
        clip: (f64, f64),
    ) -> candle_core::Result<Tensor> {
        let (mean, std) = self.tensors(shape, xs.device())?;
        xs.broadcast_sub(&mean)?
            .broadcast_div(&std)?
            .clamp(clip.0, clip.1)
    }

    /// Undo the normalization of a batch tensor whose trailing dims match `shape`.
    pub fn denormalize_tensor(
        &self,
        xs: &Tensor,
        shape: &[usize],
    ) -> candle_core::Result<Tensor> {
        let (mean, std) = self.tensors(shape, xs.device())?;
        xs.broadcast_mul(&std)?.broadcast_add(&mean)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_and_single_updates_agree() {
        let samples = vec![vec![1.0, 10.0], vec![2.0, 20.0], vec![3.0, 30.0], vec![6.0, 0.0]];

        let mut batched = RunningMeanStd::new(2);
        batched.update_batch(&samples);

        let mut single = RunningMeanStd::new(2);
        for s in &samples {
            single.update(s);
        }

        for i in 0..2 {
            assert!((batched.mean()[i] - single.mean()[i]).abs() < 1e-9);
            assert!((batched.std()[i] - single.std()[i]).abs() < 1e-9);
        }
        assert!((batched.mean()[0] - 3.0).abs() < 1e-3);
    }

    #[test]
    fn normalize_clips_to_range() {
        let mut stats = RunningMeanStd::new(1);
        stats.update_batch(&[vec![0.0], vec![1.0], vec![-1.0]]);
        let normalized = stats.normalize(&[1000.0], (-5.0, 5.0));
        assert_eq!(normalized, vec![5.0]);
    }

    #[test]
    fn tensor_normalization_round_trips() -> candle_core::Result<()> {
        let mut stats = RunningMeanStd::new(2);
        stats.update_batch(&[vec![1.0, 4.0], vec![3.0, 8.0]]);
        let xs = Tensor::new(&[[2.0f64, 5.0], [0.5, 7.0]], &Device::Cpu)?;
        let normalized = stats.normalize_tensor(&xs, &[2], (-100.0, 100.0))?;
        let restored = stats.denormalize_tensor(&normalized, &[2])?;
        let diff = (restored - xs)?.abs()?.max_all()?.to_scalar::<f64>()?;
        assert!(diff < 1e-9);
        Ok(())
    }
}
