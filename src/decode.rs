//! Decode loop: n-best hypotheses for every utterance in a stream.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::coder::{AlphabetCoder, TargetCoder, TokenizerCoder};
use crate::config::NnetConfig;
use crate::mock::{SyntheticModel, SyntheticReader};
use crate::model::{DecodingContext, DecodingModel, TrainableModel};
use crate::source::UtteranceReader;

/// Hypotheses for one utterance, best first, with one log probability per
/// hypothesis.
#[derive(Debug, Clone)]
pub struct Nbest {
    pub hypotheses: Vec<String>,
    pub scores: Vec<f32>,
}

pub type DecodingResult = HashMap<String, Nbest>;

#[derive(Args, Debug, Clone)]
pub struct DecodeArgs {
    /// Network/training configuration file (JSON). Defaults are used when
    /// omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Experiment directory holding the trained run.
    #[arg(long, default_value = "exp")]
    pub expdir: PathBuf,

    /// Number of synthetic utterances to decode.
    #[arg(long, default_value_t = 10)]
    pub utterances: usize,

    /// Feature dimension of the synthetic utterances.
    #[arg(long, default_value_t = 40)]
    pub input_dim: usize,

    #[arg(long, default_value_t = 5)]
    pub beam_width: usize,

    /// Decode hypotheses through this `tokenizer.json` instead of the
    /// built-in alphabet coder.
    #[arg(long)]
    pub tokenizer: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

/// Pull utterances from `reader` until it signals wrap-around, decoding each
/// one into an n-best list. The wrapped sentinel utterance itself is not
/// processed, so every utterance contributes exactly one entry.
pub fn decode<D, R, C>(decoder: &mut D, reader: &mut R, coder: &C) -> Result<DecodingResult>
where
    D: DecodingModel,
    R: UtteranceReader,
    C: TargetCoder + ?Sized,
{
    let mut nbests = DecodingResult::new();

    loop {
        let (utt_id, features, wrapped) = reader.get_utt()?;
        if wrapped {
            break;
        }

        let raw = decoder.decode(&features)?;
        let mut hypotheses = Vec::with_capacity(raw.len());
        let mut scores = Vec::with_capacity(raw.len());
        for hypothesis in raw {
            hypotheses.push(coder.decode(&hypothesis.labels)?);
            scores.push(hypothesis.score);
        }
        nbests.insert(utt_id, Nbest { hypotheses, scores });
    }

    Ok(nbests)
}

/// Run the decode pipeline against the synthetic collaborators, restoring
/// the decoding model from the run's final checkpoint.
pub fn run(args: DecodeArgs) -> Result<()> {
    let conf = match &args.config {
        Some(path) => NnetConfig::load(path)?,
        None => NnetConfig::default(),
    };

    let savedir = args.expdir.join(&conf.name);
    let store = CheckpointStore::create(&savedir)?;
    let final_path = store.final_path();
    if !final_path.exists() {
        bail!(
            "no final checkpoint at {:?}; train this experiment first",
            final_path
        );
    }

    let mut reader = SyntheticReader::new(args.utterances, args.input_dim, 100, args.seed)?;
    let ctx = DecodingContext {
        input_dim: args.input_dim,
        max_input_length: reader.max_input_length(),
    };

    info!("building the decoding model");
    let model = SyntheticModel {
        seed: args.seed,
        beam_width: args.beam_width,
    };
    let mut decoder = model.decoding(&ctx)?;
    decoder.restore(&final_path)?;

    let coder: Box<dyn TargetCoder> = match &args.tokenizer {
        Some(path) => Box::new(TokenizerCoder::from_file(path)?),
        None => Box::new(AlphabetCoder::ascii_lowercase()),
    };

    let nbests = decode(&mut decoder, &mut reader, coder.as_ref())?;

    info!("decoded {} utterances", nbests.len());
    for (utt_id, nbest) in &nbests {
        info!(
            "{}: [{:.3}] {}",
            utt_id,
            nbest.scores.first().copied().unwrap_or(f32::NEG_INFINITY),
            nbest.hypotheses.first().map(String::as_str).unwrap_or("")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{SyntheticDecoding, SyntheticReader};

    #[test]
    fn decodes_every_utterance_exactly_once() -> Result<()> {
        let ctx = DecodingContext {
            input_dim: 8,
            max_input_length: 30,
        };
        let mut decoder = SyntheticDecoding::new(&ctx, 4)?;
        let mut reader = SyntheticReader::new(3, 8, 30, 21)?;
        let coder = AlphabetCoder::ascii_lowercase();

        let nbests = decode(&mut decoder, &mut reader, &coder)?;

        let mut keys: Vec<&str> = nbests.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["utt-0000", "utt-0001", "utt-0002"]);

        for nbest in nbests.values() {
            assert!(!nbest.hypotheses.is_empty());
            assert_eq!(nbest.hypotheses.len(), nbest.scores.len());
        }
        Ok(())
    }

    #[test]
    fn sentinel_utterance_is_not_reprocessed() -> Result<()> {
        let ctx = DecodingContext {
            input_dim: 8,
            max_input_length: 30,
        };
        let mut decoder = SyntheticDecoding::new(&ctx, 1)?;
        let mut reader = SyntheticReader::new(1, 8, 30, 4)?;
        let coder = AlphabetCoder::ascii_lowercase();

        let nbests = decode(&mut decoder, &mut reader, &coder)?;
        assert_eq!(nbests.len(), 1);
        // The reader restarted at its first utterance; a second decode call
        // sees the same stream again.
        let again = decode(&mut decoder, &mut reader, &coder)?;
        assert_eq!(again.len(), 1);
        Ok(())
    }
}
