//! Closed symbol sets and the label codec.
//!
//! An [`Alphabet`] is an ordered list of symbols; a symbol's label is its
//! position in that list. The CTC blank is label `alphabet.len()` and is
//! never produced by [`Alphabet::encode`].

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::{GraphoneError, Result};

/// IPA symbols understood by the pronunciation side.
pub const PHONES: [char; 34] = [
    'ɹ', 'θ', 'I', 's', 'ʃ', 'j', 'v', 'æ', 'ʊ', 'ŋ', 'u', 'o', 'h', 'l', 'a', 'g', 'ɛ', 'd', 'z',
    't', 'p', 'n', 'm', 'e', 'b', 'i', 'f', 'ð', 'ʌ', 'ɔ', 'ʒ', 'w', 'ə', 'k',
];

pub const LETTER_COUNT: usize = 26;

static LETTERS: OnceLock<Alphabet> = OnceLock::new();
static PHONE_SET: OnceLock<Alphabet> = OnceLock::new();

/// An ordered, fixed set of symbols.
#[derive(Debug, Clone)]
pub struct Alphabet {
    name: &'static str,
    symbols: Vec<char>,
    index: HashMap<char, usize>,
}

impl Alphabet {
    /// Build a custom alphabet. Symbol order defines the labels.
    ///
    /// # Errors
    /// Returns [`GraphoneError::Config`] if the list is empty or a symbol repeats.
    pub fn new(name: &'static str, symbols: &[char]) -> Result<Self> {
        if symbols.is_empty() {
            return Err(GraphoneError::Config(format!("{name} alphabet is empty")));
        }
        let mut index = HashMap::with_capacity(symbols.len());
        for (label, &symbol) in symbols.iter().enumerate() {
            if index.insert(symbol, label).is_some() {
                return Err(GraphoneError::Config(format!(
                    "{name} alphabet repeats symbol {symbol:?}"
                )));
            }
        }
        Ok(Self {
            name,
            symbols: symbols.to_vec(),
            index,
        })
    }

    /// Lowercase English letters `a`..`z`.
    pub fn letters() -> &'static Alphabet {
        LETTERS.get_or_init(|| {
            let symbols: Vec<char> = ('a'..='z').collect();
            Self::from_known("letter", &symbols)
        })
    }

    /// The fixed phone list ([`PHONES`]).
    pub fn phones() -> &'static Alphabet {
        PHONE_SET.get_or_init(|| Self::from_known("phone", &PHONES))
    }

    fn from_known(name: &'static str, symbols: &[char]) -> Self {
        let index = symbols.iter().enumerate().map(|(i, &c)| (c, i)).collect();
        Self {
            name,
            symbols: symbols.to_vec(),
            index,
        }
    }

    /// Number of real symbols (`A`). The blank label equals this value.
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Label reserved for the CTC blank.
    pub fn blank(&self) -> usize {
        self.symbols.len()
    }

    pub fn label(&self, symbol: char) -> Option<usize> {
        self.index.get(&symbol).copied()
    }

    pub fn symbol(&self, label: usize) -> Option<char> {
        self.symbols.get(label).copied()
    }

    /// Encode a string into labels, one per character.
    ///
    /// # Errors
    /// [`GraphoneError::UnknownSymbol`] naming the first character outside the
    /// alphabet and its 0-based character position.
    pub fn encode(&self, text: &str) -> Result<Vec<usize>> {
        text.chars()
            .enumerate()
            .map(|(position, symbol)| {
                self.label(symbol).ok_or(GraphoneError::UnknownSymbol {
                    symbol,
                    position,
                    alphabet: self.name,
                })
            })
            .collect()
    }

    /// Decode labels back into a string. Labels outside `[0, A)`, including
    /// the blank, are skipped.
    pub fn decode(&self, labels: &[usize]) -> String {
        labels.iter().filter_map(|&l| self.symbol(l)).collect()
    }
}
