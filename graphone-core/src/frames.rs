//! Label sequence → per-frame input vectors.
//!
//! Each label `x` becomes `spacing + 1` frames of width `A + 1`:
//!
//! ```text
//! frame 0        : one-hot(x)
//! frames 1..=S   : one-hot(x) + repeat bit (coordinate A)
//! ```
//!
//! The extra frames give CTC room to place blanks between equal neighbours,
//! and the repeat bit lets the network tell a fresh symbol from a held one.

use ndarray::Array2;

/// Default number of continuation frames per label.
pub const DEFAULT_SPACING: usize = 4;

/// Expand `labels` into a `(labels.len() * (spacing + 1), alphabet_size + 1)`
/// frame matrix.
///
/// # Panics
/// Panics if a label is `>= alphabet_size`. Labels come from
/// [`Alphabet::encode`](crate::alphabet::Alphabet::encode), which never
/// produces one.
pub fn encode_frames(labels: &[usize], alphabet_size: usize, spacing: usize) -> Array2<f32> {
    let per_label = spacing + 1;
    let mut frames = Array2::<f32>::zeros((labels.len() * per_label, alphabet_size + 1));
    for (i, &label) in labels.iter().enumerate() {
        assert!(label < alphabet_size, "label {label} outside alphabet");
        let start = i * per_label;
        frames[[start, label]] = 1.0;
        for t in start + 1..start + per_label {
            frames[[t, label]] = 1.0;
            frames[[t, alphabet_size]] = 1.0;
        }
    }
    frames
}
