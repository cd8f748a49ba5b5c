use crate::decode::DecodeArgs;
use crate::train::TrainArgs;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "Listen-Attend-Spell training and decoding", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a model
    Train(TrainArgs),

    /// Decode an utterance stream with a trained model
    Decode(DecodeArgs),
}
