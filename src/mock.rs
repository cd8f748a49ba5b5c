//! Synthetic collaborators for pipeline dry runs.
//!
//! The binary's `train` and `decode` subcommands drive the full control loop
//! against these deterministic stand-ins, so checkpointing, rollback and the
//! decode plumbing can be exercised without a real acoustic model. Losses
//! follow a seeded, decaying curve; batches and utterances are generated
//! from per-index seeds so repositioning the cursor reproduces the exact
//! same data.

use anyhow::{bail, Result};
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Init, VarMap};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use std::path::Path;

use crate::model::{
    DecodingContext, DecodingModel, Hypothesis, TrainableModel, TrainingContext, TrainingModel,
};
use crate::source::{Batch, BatchSource, UtteranceReader, ValidationSet};

fn device() -> Device {
    Device::cuda_if_available(0).unwrap_or(Device::Cpu)
}

fn var(varmap: &VarMap, name: &str) -> Var {
    varmap
        .data()
        .lock()
        .expect("failed to lock VarMap")
        .get(name)
        .expect("var registered at construction")
        .clone()
}

/// Factory for the synthetic training/decoding instantiations.
#[derive(Debug, Clone)]
pub struct SyntheticModel {
    pub seed: u64,
    pub beam_width: usize,
}

impl TrainableModel for SyntheticModel {
    type Training = SyntheticTraining;
    type Decoding = SyntheticDecoding;

    fn training(&self, ctx: &TrainingContext) -> Result<SyntheticTraining> {
        SyntheticTraining::new(ctx, self.seed)
    }

    fn decoding(&self, ctx: &DecodingContext) -> Result<SyntheticDecoding> {
        SyntheticDecoding::new(ctx, self.beam_width)
    }
}

/// Training-mode stand-in. Parameters, learning rate and an update clock
/// live in a `VarMap` so checkpoints capture everything a rollback must
/// revert.
pub struct SyntheticTraining {
    varmap: VarMap,
    weights: Var,
    learning_rate: Var,
    clock: Var,
    decay: f64,
    num_steps: usize,
    device: Device,
    rng: StdRng,
    noise: Normal<f32>,
}

impl SyntheticTraining {
    pub fn new(ctx: &TrainingContext, seed: u64) -> Result<Self> {
        let device = device();
        let varmap = VarMap::new();
        varmap.get(ctx.input_dim, "weights", Init::Const(0.0), DType::F32, &device)?;
        varmap.get(
            (),
            "learning_rate",
            Init::Const(ctx.initial_learning_rate),
            DType::F64,
            &device,
        )?;
        varmap.get((), "clock", Init::Const(0.0), DType::F32, &device)?;

        let weights = var(&varmap, "weights");
        let learning_rate = var(&varmap, "learning_rate");
        let clock = var(&varmap, "clock");
        Ok(Self {
            varmap,
            weights,
            learning_rate,
            clock,
            decay: ctx.learning_rate_decay,
            num_steps: ctx.num_steps.max(1),
            device,
            rng: StdRng::seed_from_u64(seed),
            noise: Normal::new(0.0, 1.0).expect("standard normal"),
        })
    }

    fn clock_value(&self) -> Result<f32> {
        Ok(self.clock.as_tensor().to_scalar::<f32>()?)
    }

    fn lr_value(&self) -> Result<f64> {
        Ok(self.learning_rate.as_tensor().to_scalar::<f64>()?)
    }
}

impl TrainingModel for SyntheticTraining {
    fn update(&mut self, batch: &Batch) -> Result<(f32, f64)> {
        let t = self.clock_value()?;
        let lr = self.lr_value()?;

        let mut activation = 0f32;
        for features in &batch.inputs {
            activation += features.mean_all()?.to_scalar::<f32>()?;
        }
        activation /= batch.inputs.len().max(1) as f32;

        let horizon = 0.25 * self.num_steps as f32 + 1.0;
        let jitter = self.noise.sample(&mut self.rng);
        let loss = (3.0 * (-t / horizon).exp() + 0.2 + 0.05 * jitter + 1e-3 * activation.abs())
            .max(0.0);

        // Nudge the parameters so consecutive checkpoints differ.
        let delta = Tensor::full(lr as f32 * 1e-2, self.weights.shape(), &self.device)?;
        self.weights.set(&(self.weights.as_tensor() - delta)?)?;
        self.clock.set(&Tensor::new(t + 1.0, &self.device)?)?;
        self.learning_rate
            .set(&Tensor::new(lr * self.decay, &self.device)?)?;

        Ok((loss, lr))
    }

    fn evaluate(&mut self, validation: &ValidationSet) -> Result<(f32, f32)> {
        if validation.is_empty() {
            bail!("validation set is empty");
        }
        let t = self.clock_value()?;
        let jitter = self.noise.sample(&mut self.rng);
        let error = (0.9 / (1.0 + t / 25.0) + 0.02 * jitter).clamp(0.0, 1.0);
        let loss = 3.0 / (1.0 + t / 25.0) + 0.25;
        Ok((error, loss))
    }

    fn halve_learning_rate(&mut self) -> Result<()> {
        let lr = self.lr_value()?;
        self.learning_rate.set(&Tensor::new(lr * 0.5, &self.device)?)?;
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<()> {
        Ok(self.varmap.save(path)?)
    }

    fn restore(&mut self, path: &Path) -> Result<()> {
        Ok(self.varmap.load(path)?)
    }

    fn export(&self, path: &Path) -> Result<()> {
        Ok(self.varmap.save(path)?)
    }
}

/// Decoding-mode stand-in: emits a deterministic n-best list derived from
/// the utterance's features. Labels stay within the lowercase alphabet range
/// of [`crate::coder::AlphabetCoder`].
pub struct SyntheticDecoding {
    varmap: VarMap,
    beam_width: usize,
}

impl SyntheticDecoding {
    pub fn new(ctx: &DecodingContext, beam_width: usize) -> Result<Self> {
        let varmap = VarMap::new();
        varmap.get(ctx.input_dim, "weights", Init::Const(0.0), DType::F32, &device())?;
        Ok(Self { varmap, beam_width })
    }
}

impl DecodingModel for SyntheticDecoding {
    fn restore(&mut self, path: &Path) -> Result<()> {
        Ok(self.varmap.load(path)?)
    }

    fn decode(&mut self, features: &Tensor) -> Result<Vec<Hypothesis>> {
        let frames = features.dim(0)?;
        let mean = features.mean_all()?.to_scalar::<f32>()?;
        let fingerprint = mean.to_bits() as u64;

        let length = (frames / 10).clamp(1, 12);
        let mut hypotheses = Vec::with_capacity(self.beam_width);
        for k in 0..self.beam_width {
            let labels = (0..length)
                .map(|j| 1 + ((fingerprint as usize + j + k) % 26) as u32)
                .collect();
            hypotheses.push(Hypothesis {
                labels,
                score: -0.1 - 0.7 * k as f32,
            });
        }
        Ok(hypotheses)
    }
}

/// Deterministic batch source with a repositionable cursor.
///
/// Batches are generated from per-index seeds; the cursor is modular over
/// the training split, so `return_batch` inverts `get_batch` exactly even
/// across epoch wrap-around.
pub struct SyntheticSource {
    device: Device,
    seed: u64,
    total: usize,
    batch_size: usize,
    input_dim: usize,
    max_input_length: usize,
    max_target_length: usize,
    /// Batches drawn before `split()`; they form the validation pool.
    head: usize,
    split_done: bool,
    cursor: usize,
    served: Vec<usize>,
}

impl SyntheticSource {
    pub fn new(
        seed: u64,
        total_batches: usize,
        batch_size: usize,
        input_dim: usize,
        max_input_length: usize,
        max_target_length: usize,
    ) -> Result<Self> {
        if total_batches == 0 || batch_size == 0 || input_dim == 0 {
            bail!("synthetic source needs at least one batch, one utterance and one feature dim");
        }
        if max_input_length < 2 || max_target_length == 0 {
            bail!("synthetic source needs non-trivial sequence lengths");
        }
        Ok(Self {
            device: device(),
            seed,
            total: total_batches,
            batch_size,
            input_dim,
            max_input_length,
            max_target_length,
            head: 0,
            split_done: false,
            cursor: 0,
            served: Vec::new(),
        })
    }

    fn split_len(&self) -> usize {
        self.total - self.head
    }

    fn make_batch(&self, index: usize) -> Result<Batch> {
        let mut rng = StdRng::seed_from_u64(
            self.seed ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
        );
        let mut inputs = Vec::with_capacity(self.batch_size);
        let mut labels = Vec::with_capacity(self.batch_size);
        for _ in 0..self.batch_size {
            let frames = rng.gen_range(self.max_input_length / 2..=self.max_input_length).max(1);
            let data: Vec<f32> = (0..frames * self.input_dim)
                .map(|_| rng.gen_range(-1.0f32..1.0))
                .collect();
            inputs.push(Tensor::from_vec(data, (frames, self.input_dim), &self.device)?);

            let target_len = rng.gen_range(1..=self.max_target_length);
            labels.push((0..target_len).map(|_| rng.gen_range(1..27)).collect());
        }
        Ok(Batch { inputs, labels })
    }

    /// Absolute indices of every batch served so far, in order.
    pub fn history(&self) -> &[usize] {
        &self.served
    }
}

impl BatchSource for SyntheticSource {
    fn get_batch(&mut self) -> Result<Batch> {
        let index = if self.split_done {
            if self.split_len() == 0 {
                bail!("training split is empty");
            }
            let index = self.head + self.cursor;
            self.cursor = (self.cursor + 1) % self.split_len();
            index
        } else {
            if self.head == self.total {
                bail!("validation draw exhausted the batch pool");
            }
            let index = self.head;
            self.head += 1;
            index
        };
        self.served.push(index);
        self.make_batch(index)
    }

    fn return_batch(&mut self) {
        if self.split_done && self.split_len() > 0 {
            self.cursor = (self.cursor + self.split_len() - 1) % self.split_len();
        }
    }

    fn skip_batch(&mut self) {
        if self.split_done && self.split_len() > 0 {
            self.cursor = (self.cursor + 1) % self.split_len();
        }
    }

    fn split(&mut self) {
        self.split_done = true;
        self.cursor = 0;
    }

    fn num_batches(&self) -> usize {
        if self.split_done {
            self.split_len()
        } else {
            self.total
        }
    }

    fn size(&self) -> usize {
        self.num_batches() * self.batch_size
    }

    fn max_input_length(&self) -> usize {
        self.max_input_length
    }

    fn max_target_length(&self) -> usize {
        self.max_target_length
    }
}

/// Finite utterance stream that signals the wrap-around sentinel after one
/// full pass, then starts over.
pub struct SyntheticReader {
    device: Device,
    seed: u64,
    ids: Vec<String>,
    input_dim: usize,
    max_input_length: usize,
    cursor: usize,
}

impl SyntheticReader {
    pub fn new(
        utterances: usize,
        input_dim: usize,
        max_input_length: usize,
        seed: u64,
    ) -> Result<Self> {
        if utterances == 0 || input_dim == 0 || max_input_length < 2 {
            bail!("synthetic reader needs at least one utterance and a non-trivial geometry");
        }
        Ok(Self {
            device: device(),
            seed,
            ids: (0..utterances).map(|i| format!("utt-{i:04}")).collect(),
            input_dim,
            max_input_length,
            cursor: 0,
        })
    }

    fn make_features(&self, index: usize) -> Result<Tensor> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(index as u64));
        let frames = rng.gen_range(self.max_input_length / 2..=self.max_input_length).max(1);
        let data: Vec<f32> = (0..frames * self.input_dim)
            .map(|_| rng.gen_range(-1.0f32..1.0))
            .collect();
        Ok(Tensor::from_vec(data, (frames, self.input_dim), &self.device)?)
    }
}

impl UtteranceReader for SyntheticReader {
    fn get_utt(&mut self) -> Result<(String, Tensor, bool)> {
        if self.cursor == self.ids.len() {
            self.cursor = 0;
            return Ok((self.ids[0].clone(), self.make_features(0)?, true));
        }
        let index = self.cursor;
        self.cursor += 1;
        Ok((self.ids[index].clone(), self.make_features(index)?, false))
    }

    fn max_input_length(&self) -> usize {
        self.max_input_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrainingContext;

    fn ctx() -> TrainingContext {
        TrainingContext {
            input_dim: 8,
            max_input_length: 20,
            max_target_length: 6,
            initial_learning_rate: 1e-3,
            learning_rate_decay: 1.0,
            num_steps: 100,
            minibatch_size: 4,
            l2_cost_weight: 0.0,
        }
    }

    #[test]
    fn source_cursor_round_trips() -> Result<()> {
        let mut source = SyntheticSource::new(7, 10, 2, 8, 20, 6)?;
        source.split();

        source.get_batch()?;
        source.get_batch()?;
        source.return_batch();
        source.return_batch();
        let replay = source.get_batch()?;
        assert_eq!(source.history(), &[0, 1, 0]);

        // Same index regenerates identical labels.
        let mut fresh = SyntheticSource::new(7, 10, 2, 8, 20, 6)?;
        fresh.split();
        let first = fresh.get_batch()?;
        assert_eq!(replay.labels, first.labels);
        Ok(())
    }

    #[test]
    fn source_wraps_modularly() -> Result<()> {
        let mut source = SyntheticSource::new(1, 3, 1, 8, 20, 6)?;
        source.get_batch()?; // validation draw
        source.split();
        assert_eq!(source.num_batches(), 2);

        source.get_batch()?;
        source.get_batch()?;
        source.get_batch()?; // second epoch wraps
        assert_eq!(source.history(), &[0, 1, 2, 1]);

        // Rewinding across the wrap lands back on the last batch.
        source.return_batch();
        source.get_batch()?;
        assert_eq!(source.history(), &[0, 1, 2, 1, 1]);
        Ok(())
    }

    #[test]
    fn halved_learning_rate_survives_checkpoints() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ckpt.safetensors");

        let mut trainer = SyntheticTraining::new(&ctx(), 3)?;
        trainer.halve_learning_rate()?;
        trainer.save(&path)?;

        let mut restored = SyntheticTraining::new(&ctx(), 3)?;
        assert!((restored.lr_value()? - 1e-3).abs() < 1e-12);
        restored.restore(&path)?;
        assert!((restored.lr_value()? - 5e-4).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn update_advances_clock_and_restore_rewinds_it() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ckpt.safetensors");

        let mut source = SyntheticSource::new(11, 4, 2, 8, 20, 6)?;
        source.split();
        let batch = source.get_batch()?;

        let mut trainer = SyntheticTraining::new(&ctx(), 5)?;
        trainer.save(&path)?;
        trainer.update(&batch)?;
        trainer.update(&batch)?;
        assert_eq!(trainer.clock_value()?, 2.0);

        trainer.restore(&path)?;
        assert_eq!(trainer.clock_value()?, 0.0);
        Ok(())
    }

    #[test]
    fn reader_wraps_after_one_pass() -> Result<()> {
        let mut reader = SyntheticReader::new(2, 8, 20, 1)?;
        let (a, _, wrapped) = reader.get_utt()?;
        assert!(!wrapped);
        let (b, _, wrapped) = reader.get_utt()?;
        assert!(!wrapped);
        assert_ne!(a, b);
        let (sentinel, _, wrapped) = reader.get_utt()?;
        assert!(wrapped);
        assert_eq!(sentinel, a);
        // The pass restarts after the sentinel.
        let (again, _, wrapped) = reader.get_utt()?;
        assert!(!wrapped);
        assert_eq!(again, a);
        Ok(())
    }

    #[test]
    fn decoder_emits_ordered_alphabet_hypotheses() -> Result<()> {
        let dctx = DecodingContext {
            input_dim: 8,
            max_input_length: 20,
        };
        let mut decoder = SyntheticDecoding::new(&dctx, 3)?;
        let mut reader = SyntheticReader::new(1, 8, 20, 9)?;
        let (_, features, _) = reader.get_utt()?;

        let hypotheses = decoder.decode(&features)?;
        assert_eq!(hypotheses.len(), 3);
        for pair in hypotheses.windows(2) {
            assert!(pair[0].score > pair[1].score);
        }
        for hyp in &hypotheses {
            assert!(!hyp.labels.is_empty());
            assert!(hyp.labels.iter().all(|&l| (1..27).contains(&l)));
        }
        Ok(())
    }
}
