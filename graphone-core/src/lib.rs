//! # graphone-core
//!
//! Spelling ↔ IPA sequence learning with CTC.
//!
//! ## Architecture
//!
//! ```text
//! "kæt" ─► Alphabet::encode ─► encode_frames ─► Bidir::apply ─► emissions
//!                                                                  │
//!                                           best_path / PrefixSearch
//!                                                                  │
//!                                                Alphabet::decode ─► "cat"
//!
//! Dictionary ─► hash_split ─► Trainer (worker pool, CTC cost + grad, Adam)
//!                                  │
//!                         Network::save (atomic checkpoint)
//! ```
//!
//! One [`Network`] holds a speller (phones → letters) and a pronouncer
//! (letters → phones). Training drives one of them at a time.

#![deny(unsafe_code)]
#![warn(clippy::all)]

pub mod alphabet;
pub mod checkpoint;
pub mod ctc;
pub mod dictionary;
pub mod error;
pub mod evaluate;
pub mod frames;
pub mod model;
pub mod network;
pub mod train;

// Convenience re-exports for downstream crates
pub use alphabet::Alphabet;
pub use ctc::{best_path, CtcLattice, Decoder, PrefixSearch};
pub use dictionary::{Dictionary, Entry, Sample, Task};
pub use error::{GraphoneError, RecordFault, Result};
pub use evaluate::{rate, Rating};
pub use frames::encode_frames;
pub use model::{Bidir, ModelConfig, SeqFunc};
pub use network::Network;
pub use train::{
    train_network, train_with, TrainConfig, TrainDiagnostics, TrainReport, TrainSnapshot,
    TrainState, Trainer,
};
