//! Text embedding.
//!
//! The [`Embedder`] turns text into fixed-length unit vectors with one of two
//! strategies:
//!
//! - [`EmbeddingStrategy::Statistical`]: character n-gram TF-IDF, fitted on
//!   the first batch it sees, projected to `vector_size` dimensions by a
//!   seeded Gaussian matrix.
//! - [`EmbeddingStrategy::Hashing`]: a sum of per-token pseudo-random vectors,
//!   used when the statistical path cannot produce vectors.
//!
//! The switch from statistical to hashing is one-way for the lifetime of an
//! embedder (or until [`Embedder::reset`]), so every vector it hands out after
//! the switch lives in the same space.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use rand::{SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    config::EmbedderConfig,
    error::Result,
    tfidf::{RandomProjection, TfidfVectorizer, standard_normal},
    tokenizer::tokenize,
    vector_index::{Embedding, l2_normalize},
};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStrategy {
    #[default]
    Statistical,
    Hashing,
}

impl std::fmt::Display for EmbeddingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Statistical => f.write_str("statistical"),
            Self::Hashing => f.write_str("hashing"),
        }
    }
}

/// Everything needed to rebuild an embedder that embeds text into the same
/// space. The projection matrix is regenerated from `config.seed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedderSnapshot {
    pub config: EmbedderConfig,
    pub strategy: EmbeddingStrategy,
    pub vectorizer: Option<TfidfVectorizer>,
}

struct EmbedderState {
    strategy: EmbeddingStrategy,
    vectorizer: Option<Arc<TfidfVectorizer>>,
}

pub struct Embedder {
    config: EmbedderConfig,
    projection: RandomProjection,
    state: Mutex<EmbedderState>,
    /// Fallback token vectors, created on first sight.
    vocabulary: Mutex<HashMap<String, Arc<[f32]>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Embedder {
    /// Fails when `config` is invalid or its projection matrix would be too
    /// large to allocate.
    pub fn new(config: EmbedderConfig) -> Result<Self> {
        config.validate()?;
        let projection = RandomProjection::gaussian(
            config.max_features,
            config.vector_size,
            config.seed,
        )?;
        let state = EmbedderState {
            strategy: config.strategy,
            vectorizer: None,
        };

        Ok(Self {
            config,
            projection,
            state: Mutex::new(state),
            vocabulary: Mutex::new(HashMap::new()),
        })
    }

    /// Rebuild an embedder from a [`snapshot`](Self::snapshot). The stored
    /// config and vectorizer are validated like fresh ones.
    pub fn restore(snapshot: EmbedderSnapshot) -> Result<Self> {
        if let Some(vectorizer) = &snapshot.vectorizer {
            vectorizer.validate()?;
        }

        let embedder = Self::new(snapshot.config)?;
        {
            let mut state = lock(&embedder.state);
            state.strategy = snapshot.strategy;
            state.vectorizer = snapshot.vectorizer.map(Arc::new);
        }
        Ok(embedder)
    }

    pub fn snapshot(&self) -> EmbedderSnapshot {
        let state = lock(&self.state);
        EmbedderSnapshot {
            config: self.config.clone(),
            strategy: state.strategy,
            vectorizer: state.vectorizer.as_deref().cloned(),
        }
    }

    pub fn config(&self) -> &EmbedderConfig {
        &self.config
    }

    /// Length of every embedding this embedder produces.
    pub fn dimension(&self) -> usize {
        self.config.vector_size
    }

    /// The strategy currently in use.
    pub fn strategy(&self) -> EmbeddingStrategy {
        lock(&self.state).strategy
    }

    /// Whether the statistical vectorizer has been fitted.
    pub fn is_fitted(&self) -> bool {
        lock(&self.state).vectorizer.is_some()
    }

    /// Number of tokens with a fallback vector.
    pub fn vocabulary_len(&self) -> usize {
        lock(&self.vocabulary).len()
    }

    /// Forget the fitted vectorizer and the fallback vocabulary, and return
    /// to the configured strategy. The next batch refits.
    pub fn reset(&self) {
        {
            let mut state = lock(&self.state);
            state.strategy = self.config.strategy;
            state.vectorizer = None;
        }
        lock(&self.vocabulary).clear();
    }

    /// Embed a batch of texts. The output is aligned with the input.
    ///
    /// A text that cannot be embedded gets an empty vector at its position;
    /// text with no content gets a zero vector.
    pub fn embed_documents<S: AsRef<str> + Sync>(
        &self,
        texts: &[S],
    ) -> Vec<Embedding> {
        if texts.is_empty() {
            return Vec::new();
        }

        if self.strategy() == EmbeddingStrategy::Statistical {
            match self.embed_statistical(texts) {
                Ok(embeddings) => return embeddings,
                Err(e) => {
                    warn!(
                        error = %e,
                        "statistical embedding failed, switching to hashing"
                    );
                    lock(&self.state).strategy = EmbeddingStrategy::Hashing;
                }
            }
        }

        texts
            .par_iter()
            .map(|text| self.embed_hashed(text.as_ref()))
            .collect()
    }

    /// Embed a single query. Empty on failure.
    pub fn embed_query(&self, text: &str) -> Embedding {
        self.embed_documents(&[text]).pop().unwrap_or_default()
    }

    /// The fitted vectorizer, fitting it on `texts` if this is the first
    /// batch.
    fn vectorizer<S: AsRef<str>>(
        &self,
        texts: &[S],
    ) -> Result<Arc<TfidfVectorizer>> {
        let mut state = lock(&self.state);
        if let Some(vectorizer) = &state.vectorizer {
            return Ok(Arc::clone(vectorizer));
        }

        let c = &self.config;
        let fitted = if let [only] = texts {
            // One document gives degenerate idf weights; fit on a pair.
            let pair = [only.as_ref(), only.as_ref()];
            TfidfVectorizer::fit(&pair, c.max_features, c.ngram_min, c.ngram_max)?
        } else {
            TfidfVectorizer::fit(texts, c.max_features, c.ngram_min, c.ngram_max)?
        };
        debug!(
            features = fitted.n_features(),
            texts = texts.len(),
            "fitted tf-idf vectorizer"
        );

        let fitted = Arc::new(fitted);
        state.vectorizer = Some(Arc::clone(&fitted));
        Ok(fitted)
    }

    fn embed_statistical<S: AsRef<str> + Sync>(
        &self,
        texts: &[S],
    ) -> Result<Vec<Embedding>> {
        let vectorizer = self.vectorizer(texts)?;
        let rows = texts
            .par_iter()
            .map(|text| vectorizer.transform(text.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        Ok(rows
            .into_par_iter()
            .enumerate()
            .map(|(position, row)| {
                let mut embedding = self.projection.project(&row);
                l2_normalize(&mut embedding);
                finite_or_empty(embedding, position)
            })
            .collect())
    }

    fn embed_hashed(&self, text: &str) -> Embedding {
        let mut embedding = vec![0.0f32; self.config.vector_size];
        for (i, token) in tokenize(text).iter().enumerate() {
            let weight = 1.0 / (1.0 + 0.1 * i as f32);
            let vector = self.token_vector(token);
            for (e, v) in embedding.iter_mut().zip(vector.iter()) {
                *e += weight * v;
            }
        }
        l2_normalize(&mut embedding);
        embedding
    }

    fn token_vector(&self, token: &str) -> Arc<[f32]> {
        let mut vocabulary = lock(&self.vocabulary);
        if let Some(vector) = vocabulary.get(token) {
            return Arc::clone(vector);
        }
        let vector: Arc<[f32]> = self.random_token_vector(token).into();
        vocabulary.insert(token.to_string(), Arc::clone(&vector));
        vector
    }

    /// Standard normal entries from an RNG keyed by the token's hash, so a
    /// token maps to the same vector in every process.
    fn random_token_vector(&self, token: &str) -> Vec<f32> {
        let hash = blake3::hash(token.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&hash.as_bytes()[..8]);
        let seed = u64::from_le_bytes(prefix) ^ self.config.seed;

        let mut rng = StdRng::seed_from_u64(seed);
        (0..self.config.vector_size)
            .map(|_| standard_normal(&mut rng) as f32)
            .collect()
    }
}

fn finite_or_empty(embedding: Embedding, position: usize) -> Embedding {
    if embedding.iter().all(|x| x.is_finite()) {
        embedding
    } else {
        warn!(position, "embedding has non-finite values, dropping it");
        Vec::new()
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("config", &self.config)
            .field("strategy", &self.strategy())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_index::cosine_similarity;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    fn small_config() -> EmbedderConfig {
        EmbedderConfig {
            vector_size: 32,
            max_features: 500,
            ..EmbedderConfig::default()
        }
    }

    #[test]
    fn empty_batch_gives_empty_output() {
        let embedder = Embedder::new(small_config()).unwrap();
        assert!(embedder.embed_documents::<&str>(&[]).is_empty());
        assert!(!embedder.is_fitted());
    }

    #[test]
    fn batch_is_aligned_and_normalized() {
        let embedder = Embedder::new(small_config()).unwrap();
        let texts = ["출석은 어떻게 확인하나요", "장려금 지급일", "휴게실 위치"];
        let embeddings = embedder.embed_documents(&texts);

        assert_eq!(embeddings.len(), 3);
        for e in &embeddings {
            assert_eq!(e.len(), 32);
            assert!((norm(e) - 1.0).abs() < 1e-4);
        }
        assert_eq!(embedder.strategy(), EmbeddingStrategy::Statistical);
        assert!(embedder.is_fitted());
    }

    #[test]
    fn single_text_fit() {
        let embedder = Embedder::new(small_config()).unwrap();
        let e = embedder.embed_query("출석 체크 방법");
        assert_eq!(e.len(), 32);
        assert!((norm(&e) - 1.0).abs() < 1e-4);
        assert_eq!(embedder.strategy(), EmbeddingStrategy::Statistical);
    }

    #[test]
    fn query_uses_fitted_vocabulary() {
        let embedder = Embedder::new(small_config()).unwrap();
        let docs = embedder.embed_documents(&[
            "훈련장려금은 언제 지급되나요",
            "강의실 사물함 사용 방법",
        ]);
        let query = embedder.embed_query("훈련장려금 지급 시기");

        let related = cosine_similarity(&query, &docs[0]);
        let unrelated = cosine_similarity(&query, &docs[1]);
        assert!(related > unrelated, "{related} vs {unrelated}");
    }

    #[test]
    fn embedding_is_deterministic() {
        let a = Embedder::new(small_config()).unwrap();
        let b = Embedder::new(small_config()).unwrap();
        let texts = ["first question", "second question"];
        assert_eq!(a.embed_documents(&texts), b.embed_documents(&texts));
    }

    #[test]
    fn text_without_known_ngrams_is_zero() {
        let embedder = Embedder::new(small_config()).unwrap();
        embedder.embed_documents(&["alpha", "beta"]);
        let e = embedder.embed_query("");
        assert_eq!(e, vec![0.0; 32]);
    }

    #[test]
    fn falls_back_to_hashing_on_empty_vocabulary() {
        let embedder = Embedder::new(small_config()).unwrap();
        let embeddings = embedder.embed_documents(&["", "   "]);

        assert_eq!(embedder.strategy(), EmbeddingStrategy::Hashing);
        assert_eq!(embeddings, vec![vec![0.0; 32], vec![0.0; 32]]);

        let e = embedder.embed_query("hello world");
        assert!((norm(&e) - 1.0).abs() < 1e-4);
        assert_eq!(embedder.vocabulary_len(), 2);
    }

    #[test]
    fn hashing_vectors_are_stable_across_instances() {
        let config = EmbedderConfig {
            strategy: EmbeddingStrategy::Hashing,
            ..small_config()
        };
        let a = Embedder::new(config.clone()).unwrap();
        let b = Embedder::new(config).unwrap();
        assert_eq!(a.embed_query("같은 문장"), b.embed_query("같은 문장"));
    }

    #[test]
    fn hashing_is_order_sensitive() {
        let config = EmbedderConfig {
            strategy: EmbeddingStrategy::Hashing,
            ..small_config()
        };
        let embedder = Embedder::new(config).unwrap();
        let ab = embedder.embed_query("alpha beta");
        let ba = embedder.embed_query("beta alpha");
        assert_ne!(ab, ba);
        assert!(cosine_similarity(&ab, &ba) > 0.9);
    }

    #[test]
    fn reset_clears_state() {
        let embedder = Embedder::new(small_config()).unwrap();
        embedder.embed_documents(&["", ""]);
        embedder.embed_query("token");
        assert_eq!(embedder.strategy(), EmbeddingStrategy::Hashing);

        embedder.reset();
        assert_eq!(embedder.strategy(), EmbeddingStrategy::Statistical);
        assert_eq!(embedder.vocabulary_len(), 0);
        assert!(!embedder.is_fitted());
    }

    #[test]
    fn snapshot_restores_same_space() {
        let embedder = Embedder::new(small_config()).unwrap();
        embedder.embed_documents(&["출석 확인", "장려금 지급", "시설 이용"]);
        let query = embedder.embed_query("장려금 언제");

        let json = serde_json::to_string(&embedder.snapshot()).unwrap();
        let snapshot: EmbedderSnapshot = serde_json::from_str(&json).unwrap();
        let restored = Embedder::restore(snapshot).unwrap();

        assert!(restored.is_fitted());
        assert_eq!(restored.embed_query("장려금 언제"), query);
    }

    #[test]
    fn restore_rejects_oversized_projection() {
        let snapshot = EmbedderSnapshot {
            config: EmbedderConfig {
                max_features: usize::MAX / 2,
                vector_size: 4,
                ..EmbedderConfig::default()
            },
            strategy: EmbeddingStrategy::Statistical,
            vectorizer: None,
        };
        assert!(Embedder::restore(snapshot).is_err());
    }

    #[test]
    fn restore_rejects_zero_dimension() {
        let snapshot = EmbedderSnapshot {
            config: EmbedderConfig {
                vector_size: 0,
                ..small_config()
            },
            strategy: EmbeddingStrategy::Hashing,
            vectorizer: None,
        };
        assert!(Embedder::restore(snapshot).is_err());
    }

    #[test]
    fn strategy_serializes_snake_case() {
        let json = serde_json::to_string(&EmbeddingStrategy::Hashing).unwrap();
        assert_eq!(json, "\"hashing\"");
    }
}
