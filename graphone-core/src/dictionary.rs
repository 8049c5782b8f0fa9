//! Spelling/pronunciation dictionary and CTC sample source.
//!
//! File format: UTF-8, one `spelling,pronunciation` record per line. Blank
//! lines are skipped. The first bad record aborts the whole load.

use std::fs;
use std::path::Path;

use ndarray::Array2;
use rand::{seq::SliceRandom, Rng};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::alphabet::Alphabet;
use crate::error::{GraphoneError, RecordFault, Result};
use crate::frames::{encode_frames, DEFAULT_SPACING};

/// Which way samples map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    /// Phones in, letters out.
    Spell,
    /// Letters in, phones out.
    Pronounce,
}

impl Task {
    pub fn input_alphabet(self) -> &'static Alphabet {
        match self {
            Task::Spell => Alphabet::phones(),
            Task::Pronounce => Alphabet::letters(),
        }
    }

    pub fn output_alphabet(self) -> &'static Alphabet {
        match self {
            Task::Spell => Alphabet::letters(),
            Task::Pronounce => Alphabet::phones(),
        }
    }
}

impl std::str::FromStr for Task {
    type Err = GraphoneError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spell" => Ok(Task::Spell),
            "pronounce" => Ok(Task::Pronounce),
            other => Err(GraphoneError::Config(format!(
                "unknown task {other:?} (expected 'spell' or 'pronounce')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub spelling: String,
    pub pronunciation: String,
}

/// One training example. Derived from an entry on every access.
#[derive(Debug, Clone)]
pub struct Sample {
    /// `(frames, A_in + 1)` input frames.
    pub input: Array2<f32>,
    /// Target labels over the output alphabet.
    pub target: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct Dictionary {
    entries: Vec<Entry>,
    task: Task,
    spacing: usize,
}

impl Dictionary {
    pub fn new(entries: Vec<Entry>) -> Self {
        Self {
            entries,
            task: Task::Spell,
            spacing: DEFAULT_SPACING,
        }
    }

    /// Read and validate a dictionary file.
    ///
    /// # Errors
    /// - [`GraphoneError::Io`] if the file cannot be read.
    /// - [`GraphoneError::MalformedRecord`] for the first invalid line (0-based).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let dict = Self::parse(&raw)?;
        info!("loaded {} dictionary entries from {:?}", dict.len(), path);
        Ok(dict)
    }

    /// Parse dictionary text. See [`Dictionary::load`].
    pub fn parse(raw: &str) -> Result<Self> {
        let letters = Alphabet::letters();
        let phones = Alphabet::phones();
        let mut entries = Vec::new();

        for (line, record) in raw.split('\n').enumerate() {
            let record = record.strip_suffix('\r').unwrap_or(record);
            if record.is_empty() {
                continue;
            }
            let malformed = |fault| GraphoneError::MalformedRecord { line, fault };

            let columns: Vec<&str> = record.split(',').collect();
            let &[spelling, pronunciation] = columns.as_slice() else {
                return Err(malformed(RecordFault::ColumnCount(columns.len())));
            };
            if spelling.is_empty() || pronunciation.is_empty() {
                return Err(malformed(RecordFault::EmptyField));
            }
            if let Some(c) = spelling.chars().find(|&c| letters.label(c).is_none()) {
                return Err(malformed(RecordFault::InvalidLetter(c)));
            }
            if let Some(c) = pronunciation.chars().find(|&c| phones.label(c).is_none()) {
                return Err(malformed(RecordFault::InvalidPhone(c)));
            }

            entries.push(Entry {
                spelling: spelling.to_string(),
                pronunciation: pronunciation.to_string(),
            });
        }

        Ok(Self::new(entries))
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.task = task;
        self
    }

    pub fn with_spacing(mut self, spacing: usize) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn spacing(&self) -> usize {
        self.spacing
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, i: usize) -> &Entry {
        &self.entries[i]
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn swap(&mut self, i: usize, j: usize) {
        self.entries.swap(i, j);
    }

    /// Copy of the `[start, end)` range, sharing task and spacing.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        Self {
            entries: self.entries[start..end].to_vec(),
            task: self.task,
            spacing: self.spacing,
        }
    }

    /// Reorder so that new position `i` holds old entry `permutation[i]`.
    ///
    /// # Errors
    /// [`GraphoneError::Config`] unless `permutation` is a permutation of `0..len`.
    pub fn permute(&mut self, permutation: &[usize]) -> Result<()> {
        let n = self.entries.len();
        let mut seen = vec![false; n];
        if permutation.len() != n {
            return Err(GraphoneError::Config(format!(
                "permutation has {} indices for {n} entries",
                permutation.len()
            )));
        }
        for &i in permutation {
            if i >= n || std::mem::replace(&mut seen[i], true) {
                return Err(GraphoneError::Config(format!(
                    "index {i} is out of range or repeated"
                )));
            }
        }
        self.entries = permutation.iter().map(|&i| self.entries[i].clone()).collect();
        Ok(())
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.entries.shuffle(rng);
    }

    /// Build the CTC sample for entry `i` according to the current task.
    ///
    /// # Errors
    /// [`GraphoneError::UnknownSymbol`] if an entry bypassed validation
    /// (e.g. built with [`Dictionary::new`]) and holds a foreign symbol.
    pub fn sample(&self, i: usize) -> Result<Sample> {
        let entry = &self.entries[i];
        let (input_text, target_text) = match self.task {
            Task::Spell => (&entry.pronunciation, &entry.spelling),
            Task::Pronounce => (&entry.spelling, &entry.pronunciation),
        };
        let input_alphabet = self.task.input_alphabet();
        let input_labels = input_alphabet.encode(input_text)?;
        let target = self.task.output_alphabet().encode(target_text)?;
        Ok(Sample {
            input: encode_frames(&input_labels, input_alphabet.len(), self.spacing),
            target,
        })
    }

    /// Partition by a content hash of the spelling.
    ///
    /// An entry goes to validation iff the first 8 bytes of SHA-256(spelling),
    /// read as a big-endian `u64`, fall below `fraction * 2^64`. Returns
    /// `(validation, training)`.
    pub fn hash_split(&self, fraction: f64) -> (Self, Self) {
        let fraction = fraction.clamp(0.0, 1.0);
        let mut validation = Vec::new();
        let mut training = Vec::new();
        for entry in &self.entries {
            if in_validation(spelling_hash(&entry.spelling), fraction) {
                validation.push(entry.clone());
            } else {
                training.push(entry.clone());
            }
        }
        debug!(
            "hash split: {} validation / {} training (fraction {fraction})",
            validation.len(),
            training.len()
        );
        let split = |entries| Self {
            entries,
            task: self.task,
            spacing: self.spacing,
        };
        (split(validation), split(training))
    }

    /// Records as `spelling,pronunciation` lines, sorted.
    pub fn sorted_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("{},{}", e.spelling, e.pronunciation))
            .collect();
        lines.sort();
        lines
    }

    /// Write the sorted records to `path`, one per line.
    pub fn write_sorted(&self, path: &Path) -> Result<()> {
        let mut text = String::new();
        for line in self.sorted_lines() {
            text.push_str(&line);
            text.push('\n');
        }
        crate::checkpoint::write_atomic(path, text.as_bytes())?;
        Ok(())
    }
}

fn spelling_hash(spelling: &str) -> u64 {
    let digest = Sha256::digest(spelling.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

fn in_validation(hash: u64, fraction: f64) -> bool {
    if fraction >= 1.0 {
        return true;
    }
    // 2^64 * fraction, exact enough for bucketing.
    let cutoff = fraction * 18_446_744_073_709_551_616.0;
    (hash as f64) < cutoff
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn entry(s: &str, p: &str) -> Entry {
        Entry {
            spelling: s.into(),
            pronunciation: p.into(),
        }
    }

    #[test]
    fn parse_skips_blank_lines() {
        let dict = Dictionary::parse("cat,kæt\n\nbat,bæt\n").unwrap();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.entry(1), &entry("bat", "bæt"));
    }

    #[test]
    fn parse_accepts_crlf() {
        let dict = Dictionary::parse("cat,kæt\r\nbat,bæt\r\n").unwrap();
        assert_eq!(dict.entry(0).pronunciation, "kæt");
    }

    #[test]
    fn invalid_letter_reports_line() {
        let err = Dictionary::parse("cat,kæt\n\n1x,kæt\n").unwrap_err();
        match err {
            GraphoneError::MalformedRecord { line, fault } => {
                assert_eq!(line, 2);
                assert_eq!(fault, RecordFault::InvalidLetter('1'));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn record_faults() {
        let fault = |raw: &str| match Dictionary::parse(raw) {
            Err(GraphoneError::MalformedRecord { fault, .. }) => fault,
            other => panic!("expected malformed record, got {other:?}"),
        };
        assert_eq!(fault("cat"), RecordFault::ColumnCount(1));
        assert_eq!(fault("cat,kæt,x"), RecordFault::ColumnCount(3));
        assert_eq!(fault(",kæt"), RecordFault::EmptyField);
        assert_eq!(fault("cat,"), RecordFault::EmptyField);
        assert_eq!(fault("cat,kxt"), RecordFault::InvalidPhone('x'));
    }

    #[test]
    fn sample_direction_follows_task() {
        let dict = Dictionary::parse("cat,kæt\n").unwrap().with_spacing(2);

        let spell = dict.clone().with_task(Task::Spell).sample(0).unwrap();
        assert_eq!(spell.input.dim(), (9, Alphabet::phones().len() + 1));
        assert_eq!(spell.target, vec![2, 0, 19]);

        let pron = dict.with_task(Task::Pronounce).sample(0).unwrap();
        assert_eq!(pron.input.dim(), (9, 27));
        assert_eq!(pron.target, Alphabet::phones().encode("kæt").unwrap());
    }

    #[test]
    fn slice_is_independent() {
        let dict = Dictionary::parse("a,a\nb,b\nc,k\n").unwrap();
        let mut sub = dict.slice(1, 3);
        sub.swap(0, 1);
        assert_eq!(sub.entry(0).spelling, "c");
        assert_eq!(dict.entry(1).spelling, "b");
    }

    #[test]
    fn permute_validates_indices() {
        let mut dict = Dictionary::parse("a,a\nb,b\nc,k\n").unwrap();
        dict.permute(&[2, 0, 1]).unwrap();
        assert_eq!(dict.entry(0).spelling, "c");
        assert_eq!(dict.entry(1).spelling, "a");
        assert!(dict.permute(&[0, 0, 1]).is_err());
        assert!(dict.permute(&[0, 1]).is_err());
    }

    #[test]
    fn shuffle_keeps_entries() {
        let mut dict = Dictionary::parse("a,a\nb,b\nc,k\nd,d\ne,e\n").unwrap();
        dict.shuffle(&mut StdRng::seed_from_u64(7));
        let mut lines = dict.sorted_lines();
        lines.dedup();
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn shuffle_is_the_seeded_slice_shuffle() {
        let dict = Dictionary::new((0..50).map(|i| entry(&spelled_number(i), "a")).collect());
        let mut shuffled = dict.clone();
        shuffled.shuffle(&mut StdRng::seed_from_u64(11));

        let mut expected = dict.entries().to_vec();
        expected.shuffle(&mut StdRng::seed_from_u64(11));
        assert_eq!(shuffled.entries(), expected.as_slice());
        assert_ne!(shuffled.entries(), dict.entries());
    }

    #[test]
    fn hash_split_ignores_order() {
        let dict = Dictionary::new((0..400).map(|i| entry(&spelled_number(i), "a")).collect());

        let (val_a, _) = dict.hash_split(0.25);
        let mut shuffled = dict.clone();
        shuffled.shuffle(&mut StdRng::seed_from_u64(99));
        let (val_b, _) = shuffled.hash_split(0.25);
        assert_eq!(val_a.sorted_lines(), val_b.sorted_lines());
    }

    #[test]
    fn hash_split_fraction_converges() {
        let dict = Dictionary::new((0..4000).map(|i| entry(&spelled_number(i), "a")).collect());
        let (validation, training) = dict.hash_split(0.1);
        assert_eq!(validation.len() + training.len(), 4000);
        let observed = validation.len() as f64 / 4000.0;
        assert!((observed - 0.1).abs() < 0.02, "observed fraction {observed}");
    }

    #[test]
    fn hash_split_extremes() {
        let dict = Dictionary::parse("cat,kæt\nbat,bæt\n").unwrap();
        let (v, t) = dict.hash_split(0.0);
        assert_eq!((v.len(), t.len()), (0, 2));
        let (v, t) = dict.hash_split(1.0);
        assert_eq!((v.len(), t.len()), (2, 0));
    }

    /// Distinct lowercase spelling for every integer (base-26 digits).
    fn spelled_number(mut n: usize) -> String {
        let mut s = String::new();
        loop {
            s.push((b'a' + (n % 26) as u8) as char);
            n /= 26;
            if n == 0 {
                break s;
            }
        }
    }
}
