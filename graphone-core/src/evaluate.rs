//! Exact-match accuracy of a trained network over a dictionary.

use rand::Rng;
use tracing::info;

use crate::ctc::Decoder;
use crate::dictionary::{Dictionary, Task};
use crate::error::Result;
use crate::network::Network;

/// Entries between progress lines.
const PROGRESS_EVERY: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rating {
    pub correct: usize,
    pub total: usize,
}

impl Rating {
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

/// Decode every entry (in shuffled order) and count exact matches.
///
/// # Errors
/// Stops at the first entry the network cannot process.
pub fn rate<R: Rng + ?Sized>(
    network: &Network,
    dictionary: &Dictionary,
    task: Task,
    decoder: Decoder,
    rng: &mut R,
) -> Result<Rating> {
    let mut order = dictionary.clone();
    order.shuffle(rng);

    let mut rating = Rating::default();
    for entry in order.entries() {
        let (input, expected) = match task {
            Task::Spell => (&entry.pronunciation, &entry.spelling),
            Task::Pronounce => (&entry.spelling, &entry.pronunciation),
        };
        let actual = network.infer(task, input, decoder)?;
        if &actual == expected {
            rating.correct += 1;
        }
        rating.total += 1;
        if rating.total % PROGRESS_EVERY == 0 {
            info!(
                "rated {}/{} ({:.2}%)",
                rating.correct,
                rating.total,
                100.0 * rating.accuracy()
            );
        }
    }
    info!(
        "{task:?}: {}/{} correct ({:.2}%)",
        rating.correct,
        rating.total,
        100.0 * rating.accuracy()
    );
    Ok(rating)
}
