//! Emission → label sequence.

use std::collections::BTreeMap;
use std::str::FromStr;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use super::{log_add, NEG_INF};
use crate::error::GraphoneError;

/// Per-frame argmax (ties go to the lowest index), then collapse repeats and
/// drop blanks. The blank is the last column.
pub fn best_path(emission: ArrayView2<'_, f32>) -> Vec<usize> {
    let Some(blank) = emission.ncols().checked_sub(1) else {
        return Vec::new();
    };
    let mut labels = Vec::new();
    let mut previous = None;
    for row in emission.rows() {
        let mut best = 0;
        for (k, &v) in row.iter().enumerate().skip(1) {
            if v > row[best] {
                best = k;
            }
        }
        if best != blank && previous != Some(best) {
            labels.push(best);
        }
        previous = Some(best);
    }
    labels
}

/// Prefix beam search over collapsed label sequences.
///
/// Each surviving prefix tracks two log-masses: paths ending in a blank and
/// paths ending in its last label. After every frame, prefixes whose total
/// falls below `prune_ratio` times the best one are dropped and at most
/// `beam_width` are kept. Ties are broken by the lexicographically smaller
/// prefix so the result is reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefixSearch {
    pub prune_ratio: f64,
    pub beam_width: usize,
}

impl Default for PrefixSearch {
    fn default() -> Self {
        Self {
            prune_ratio: 1e-4,
            beam_width: 16,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Mass {
    blank: f64,
    label: f64,
}

impl Mass {
    const EMPTY: Self = Self {
        blank: NEG_INF,
        label: NEG_INF,
    };

    fn total(&self) -> f64 {
        log_add(self.blank, self.label)
    }
}

impl PrefixSearch {
    pub fn decode(&self, emission: ArrayView2<'_, f32>) -> Vec<usize> {
        let Some(blank) = emission.ncols().checked_sub(1) else {
            return Vec::new();
        };
        let cutoff = self.prune_ratio.max(f64::MIN_POSITIVE).ln();
        let width = self.beam_width.max(1);

        let mut beams: Vec<(Vec<usize>, Mass)> = vec![(
            Vec::new(),
            Mass {
                blank: 0.0,
                label: NEG_INF,
            },
        )];

        for row in emission.rows() {
            let y = |k: usize| f64::from(row[k]);
            let frame_best = row.fold(f32::NEG_INFINITY, |m, &x| m.max(x)) as f64;
            let candidates: Vec<usize> = (0..blank)
                .filter(|&k| y(k) >= frame_best + cutoff)
                .collect();

            let mut next: BTreeMap<Vec<usize>, Mass> = BTreeMap::new();
            for (prefix, mass) in &beams {
                let total = mass.total();

                let stay = next.entry(prefix.clone()).or_insert(Mass::EMPTY);
                stay.blank = log_add(stay.blank, total + y(blank));
                if let Some(&last) = prefix.last() {
                    // A repeated label without a blank in between collapses.
                    stay.label = log_add(stay.label, mass.label + y(last));
                }

                for &k in &candidates {
                    let mut extended = prefix.clone();
                    extended.push(k);
                    let source = if prefix.last() == Some(&k) {
                        mass.blank
                    } else {
                        total
                    };
                    let grown = next.entry(extended).or_insert(Mass::EMPTY);
                    grown.label = log_add(grown.label, source + y(k));
                }
            }

            beams = next.into_iter().collect();
            rank(&mut beams);
            if let Some(best) = beams.first().map(|(_, m)| m.total()) {
                beams.retain(|(_, m)| m.total() >= best + cutoff);
            }
            beams.truncate(width);
        }

        beams
            .into_iter()
            .next()
            .map(|(prefix, _)| prefix)
            .unwrap_or_default()
    }
}

/// Most probable first; equal totals fall back to prefix order.
fn rank(beams: &mut [(Vec<usize>, Mass)]) {
    beams.sort_by(|(pa, ma), (pb, mb)| {
        mb.total()
            .total_cmp(&ma.total())
            .then_with(|| pa.cmp(pb))
    });
}

/// Decoding strategy used by the network front-end.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decoder {
    #[default]
    BestPath,
    PrefixSearch(PrefixSearch),
}

impl Decoder {
    pub fn decode(&self, emission: ArrayView2<'_, f32>) -> Vec<usize> {
        match self {
            Self::BestPath => best_path(emission),
            Self::PrefixSearch(search) => search.decode(emission),
        }
    }
}

impl FromStr for Decoder {
    type Err = GraphoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best" | "best-path" | "best_path" => Ok(Self::BestPath),
            "prefix" | "prefix-search" | "prefix_search" | "beam" => {
                Ok(Self::PrefixSearch(PrefixSearch::default()))
            }
            other => Err(GraphoneError::Config(format!(
                "unknown decoder {other:?} (expected 'best-path' or 'prefix')"
            ))),
        }
    }
}
