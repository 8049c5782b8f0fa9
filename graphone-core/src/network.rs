//! The speller/pronouncer pair and its inference entry points.

use std::path::Path;

use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::alphabet::Alphabet;
use crate::checkpoint::{self, ModelState};
use crate::ctc::{CtcLattice, Decoder};
use crate::dictionary::Task;
use crate::error::{GraphoneError, Result};
use crate::frames::encode_frames;
use crate::model::{Bidir, ModelConfig, SeqFunc};

const FORMAT: &str = "graphone-network";
const VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    format: String,
    version: u32,
    config: ModelConfig,
    speller: ModelState,
    pronouncer: ModelState,
}

/// Two bidirectional models: phones → letters and letters → phones.
#[derive(Debug, Clone)]
pub struct Network {
    config: ModelConfig,
    speller: Bidir,
    pronouncer: Bidir,
}

impl Network {
    /// Fresh, randomly initialised network.
    pub fn new(config: &ModelConfig) -> Self {
        let mut config = config.clone();
        config.normalize();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let speller = Bidir::new(
            Alphabet::phones().len() + 1,
            Alphabet::letters().len(),
            &config,
            &mut rng,
        );
        let pronouncer = Bidir::new(
            Alphabet::letters().len() + 1,
            Alphabet::phones().len(),
            &config,
            &mut rng,
        );
        Self {
            config,
            speller,
            pronouncer,
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn spacing(&self) -> usize {
        self.config.spacing
    }

    pub fn model(&self, task: Task) -> &Bidir {
        match task {
            Task::Spell => &self.speller,
            Task::Pronounce => &self.pronouncer,
        }
    }

    pub fn model_mut(&mut self, task: Task) -> &mut Bidir {
        match task {
            Task::Spell => &mut self.speller,
            Task::Pronounce => &mut self.pronouncer,
        }
    }

    /// Spelling for an IPA string.
    pub fn spell(&self, phonetic: &str) -> Result<String> {
        self.spell_with(phonetic, Decoder::BestPath)
    }

    pub fn spell_with(&self, phonetic: &str, decoder: Decoder) -> Result<String> {
        self.run(Task::Spell, phonetic, decoder)
    }

    /// IPA transcription for a spelling. Input is lower-cased first.
    pub fn pronounce(&self, spelling: &str) -> Result<String> {
        self.pronounce_with(spelling, Decoder::BestPath)
    }

    pub fn pronounce_with(&self, spelling: &str, decoder: Decoder) -> Result<String> {
        self.run(Task::Pronounce, &spelling.to_lowercase(), decoder)
    }

    /// Decode `input` for `task` without any case folding.
    pub fn infer(&self, task: Task, input: &str, decoder: Decoder) -> Result<String> {
        self.run(task, input, decoder)
    }

    /// `(spell_cost, pronounce_cost)` for one dictionary pair.
    pub fn costs(&self, spelling: &str, phonetic: &str) -> Result<(f64, f64)> {
        let letters = Alphabet::letters().encode(spelling)?;
        let phones = Alphabet::phones().encode(phonetic)?;
        let mut lattice = CtcLattice::new();
        let spell = self.cost(Task::Spell, &phones, &letters, &mut lattice)?;
        let pronounce = self.cost(Task::Pronounce, &letters, &phones, &mut lattice)?;
        Ok((spell, pronounce))
    }

    fn emission(&self, task: Task, input_labels: &[usize]) -> ndarray::Array2<f32> {
        let frames = encode_frames(
            input_labels,
            task.input_alphabet().len(),
            self.config.spacing,
        );
        self.model(task)
            .apply(std::slice::from_ref(&frames))
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    fn cost(
        &self,
        task: Task,
        input: &[usize],
        target: &[usize],
        lattice: &mut CtcLattice,
    ) -> Result<f64> {
        let emission = self.emission(task, input);
        lattice.cost(emission.view(), target)
    }

    fn run(&self, task: Task, input: &str, decoder: Decoder) -> Result<String> {
        let labels = task.input_alphabet().encode(input)?;
        let emission = self.emission(task, &labels);
        Ok(task.output_alphabet().decode(&decoder.decode(emission.view())))
    }

    /// Write the whole network atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = Snapshot {
            format: FORMAT.to_string(),
            version: VERSION,
            config: self.config.clone(),
            speller: self.speller.clone().into(),
            pronouncer: self.pronouncer.clone().into(),
        };
        checkpoint::write_json(path, &snapshot)?;
        info!("saved network to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let snapshot: Snapshot = checkpoint::read_json(path)?;
        if snapshot.format != FORMAT {
            return Err(GraphoneError::Checkpoint(format!(
                "{} is not a network checkpoint (format {:?})",
                path.display(),
                snapshot.format
            )));
        }
        if snapshot.version != VERSION {
            return Err(GraphoneError::Checkpoint(format!(
                "unsupported checkpoint version {} (expected {VERSION})",
                snapshot.version
            )));
        }

        let network = Self {
            config: snapshot.config,
            speller: snapshot.speller.into_bidir(),
            pronouncer: snapshot.pronouncer.into_bidir(),
        };
        for task in [Task::Spell, Task::Pronounce] {
            network
                .model(task)
                .check_shape(
                    task.input_alphabet().len() + 1,
                    task.output_alphabet().len() + 1,
                )
                .map_err(|e| {
                    GraphoneError::Checkpoint(format!("{task:?} model in {}: {e}", path.display()))
                })?;
        }
        info!("loaded network from {}", path.display());
        Ok(network)
    }

    /// Load `path` if it exists, otherwise build a fresh network.
    pub fn load_or_new(path: &Path, config: &ModelConfig) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("no checkpoint at {}; initialising", path.display());
            Ok(Self::new(config))
        }
    }
}
