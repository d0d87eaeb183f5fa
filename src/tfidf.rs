//! TF-IDF vectorization and Gaussian random projection.
//!
//! These are the two halves of the statistical embedding strategy: a sparse
//! TF-IDF row over character n-grams, projected down to a small dense vector
//! by a fixed random matrix.

use std::collections::{HashMap, HashSet};

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Sparse row as `(feature index, weight)` pairs sorted by index.
pub type SparseVector = Vec<(usize, f32)>;

/// Word-bounded character n-grams of `text`.
///
/// Each whitespace-separated word is padded with one space on both sides
/// before windows of `min..=max` characters are taken, so n-grams never
/// straddle two words and word boundaries are part of the features.
///
/// # Examples
///
/// ```
/// use faqmatch::tfidf::char_ngrams;
///
/// assert_eq!(char_ngrams("ab", 2, 2), vec![" a", "ab", "b "]);
/// ```
pub fn char_ngrams(text: &str, min: usize, max: usize) -> Vec<String> {
    let mut grams = Vec::new();
    for word in text.to_lowercase().split_whitespace() {
        let padded: Vec<char> = std::iter::once(' ')
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for n in min.max(1)..=max {
            if n > padded.len() {
                break;
            }
            grams.extend(padded.windows(n).map(|w| w.iter().collect::<String>()));
        }
    }
    grams
}

/// A fitted TF-IDF model.
///
/// Term frequencies are sublinear (`1 + ln tf`), idf is smoothed
/// (`ln((1 + n) / (1 + df)) + 1`), no document-frequency cut-offs are applied
/// and every row is L2-normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfVectorizer {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
    ngram_min: usize,
    ngram_max: usize,
}

impl TfidfVectorizer {
    /// Learn the vocabulary and idf weights from `texts`.
    ///
    /// When there are more than `max_features` distinct n-grams, the most
    /// frequent ones across the corpus are kept (ties broken by the n-gram
    /// itself). Feature indices follow the lexicographic order of the kept
    /// n-grams. Fails when the texts contain no n-grams at all.
    pub fn fit<S: AsRef<str>>(
        texts: &[S],
        max_features: usize,
        ngram_min: usize,
        ngram_max: usize,
    ) -> Result<Self> {
        let mut totals: HashMap<String, usize> = HashMap::new();
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for text in texts {
            let mut seen = HashSet::new();
            for gram in char_ngrams(text.as_ref(), ngram_min, ngram_max) {
                *totals.entry(gram.clone()).or_default() += 1;
                if seen.insert(gram.clone()) {
                    *doc_freq.entry(gram).or_default() += 1;
                }
            }
        }

        if totals.is_empty() {
            return Err(Error::Embedding(
                "empty vocabulary: no n-grams in the fitted texts".into(),
            ));
        }

        let mut terms: Vec<(String, usize)> = totals.into_iter().collect();
        if terms.len() > max_features {
            terms.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            terms.truncate(max_features);
        }
        terms.sort_by(|a, b| a.0.cmp(&b.0));

        let n = texts.len() as f32;
        let mut vocabulary = HashMap::with_capacity(terms.len());
        let mut idf = Vec::with_capacity(terms.len());
        for (index, (term, _)) in terms.into_iter().enumerate() {
            let df = doc_freq.get(&term).copied().unwrap_or(0) as f32;
            idf.push(((1.0 + n) / (1.0 + df)).ln() + 1.0);
            vocabulary.insert(term, index);
        }

        Ok(Self {
            vocabulary,
            idf,
            ngram_min,
            ngram_max,
        })
    }

    pub fn n_features(&self) -> usize {
        self.idf.len()
    }

    /// Check that every vocabulary entry has an idf weight.
    pub fn validate(&self) -> Result<()> {
        if self.vocabulary.len() != self.idf.len() {
            return Err(Error::Embedding(format!(
                "vocabulary has {} terms but {} idf weights",
                self.vocabulary.len(),
                self.idf.len()
            )));
        }
        if let Some(index) =
            self.vocabulary.values().find(|&&i| i >= self.idf.len())
        {
            return Err(Error::Embedding(format!(
                "feature index {index} out of range"
            )));
        }
        Ok(())
    }

    /// TF-IDF row for `text`. Unknown n-grams are ignored, so text with no
    /// known n-grams gives an empty row.
    pub fn transform(&self, text: &str) -> Result<SparseVector> {
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for gram in char_ngrams(text, self.ngram_min, self.ngram_max) {
            if let Some(&index) = self.vocabulary.get(&gram) {
                *counts.entry(index).or_default() += 1;
            }
        }

        let mut row = Vec::with_capacity(counts.len());
        for (index, count) in counts {
            let idf = self.idf.get(index).ok_or_else(|| {
                Error::Embedding(format!("feature index {index} out of range"))
            })?;
            row.push((index, (1.0 + (count as f32).ln()) * idf));
        }
        row.sort_by_key(|&(index, _)| index);

        let norm = row.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            for (_, w) in &mut row {
                *w /= norm;
            }
        }
        Ok(row)
    }
}

/// Upper bound on projection matrix entries (256 MiB of f32).
pub const MAX_PROJECTION_WEIGHTS: usize = 1 << 26;

/// Number of entries in an `input_dim` x `output_dim` projection.
pub fn projection_size(input_dim: usize, output_dim: usize) -> Result<usize> {
    input_dim
        .checked_mul(output_dim)
        .filter(|&size| size <= MAX_PROJECTION_WEIGHTS)
        .ok_or_else(|| {
            Error::Embedding(format!(
                "projection of {input_dim} x {output_dim} is too large"
            ))
        })
}

/// A fixed dense Gaussian matrix mapping `input_dim` sparse features to
/// `output_dim` dense ones.
///
/// Entries are i.i.d. normal with mean 0 and standard deviation
/// `1 / sqrt(output_dim)`, generated from a seed so the same seed always
/// yields the same matrix.
#[derive(Clone)]
pub struct RandomProjection {
    input_dim: usize,
    output_dim: usize,
    /// Row-major: `weights[i * output_dim + j]`.
    weights: Vec<f32>,
}

impl RandomProjection {
    /// Fails when the matrix would hold more than
    /// [`MAX_PROJECTION_WEIGHTS`] entries.
    pub fn gaussian(
        input_dim: usize,
        output_dim: usize,
        seed: u64,
    ) -> Result<Self> {
        let size = projection_size(input_dim, output_dim)?;
        let std_dev = 1.0 / (output_dim as f64).sqrt();
        let mut rng = StdRng::seed_from_u64(seed);
        let weights = (0..size)
            .map(|_| (standard_normal(&mut rng) * std_dev) as f32)
            .collect();

        Ok(Self {
            input_dim,
            output_dim,
            weights,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// Multiply a sparse row by the matrix.
    ///
    /// A row narrower than `input_dim` behaves as if zero-padded; features at
    /// or beyond `input_dim` are dropped.
    pub fn project(&self, row: &[(usize, f32)]) -> Vec<f32> {
        let mut out = vec![0.0f32; self.output_dim];
        for &(index, value) in row {
            if index >= self.input_dim {
                continue;
            }
            let start = index * self.output_dim;
            let weights = &self.weights[start..start + self.output_dim];
            for (o, w) in out.iter_mut().zip(weights) {
                *o += value * w;
            }
        }
        out
    }
}

impl std::fmt::Debug for RandomProjection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RandomProjection")
            .field("input_dim", &self.input_dim)
            .field("output_dim", &self.output_dim)
            .finish_non_exhaustive()
    }
}

/// Draw from N(0, 1) with the Box-Muller transform.
pub fn standard_normal<R: Rng>(rng: &mut R) -> f64 {
    // u1 in (0, 1) keeps ln finite.
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.r#gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
