//! The searchable index and its publication.
//!
//! An [`IndexSnapshot`] bundles everything a query needs and never changes
//! after it is built. [`FaqIndex`] holds the current snapshot; rebuilding or
//! loading prepares a new snapshot off to the side and swaps it in, so
//! readers never observe a half-built index.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, PoisonError, RwLock},
};

use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    data_dir::{DataDir, VECTOR_STORE_FILE},
    document::{DocId, Document, ScoredDocument},
    embedding::Embedder,
    error::{Error, Result},
    lexical_index::LexicalIndex,
    store::{self, StoredIndex},
    tokenizer::Tokenizer,
    vector_index::{Embedding, VectorIndex},
};

/// Immutable index over one corpus.
///
/// `documents`, `tokenized_corpus` and the vector index are aligned by
/// [`DocId`].
#[derive(Debug)]
pub struct IndexSnapshot {
    documents: Vec<Document>,
    tokenized_corpus: Vec<Vec<String>>,
    lexical: LexicalIndex,
    vectors: VectorIndex,
    embedder: Embedder,
}

impl IndexSnapshot {
    /// Embed and index `documents`. Invalid documents must already be
    /// filtered out.
    pub fn build(
        documents: Vec<Document>,
        tokenizer: &Tokenizer,
        config: &Config,
    ) -> Result<Self> {
        let preprocessed: Vec<String> = documents
            .iter()
            .map(|doc| tokenizer.preprocess(&doc.question))
            .collect();
        let tokenized_corpus: Vec<Vec<String>> = preprocessed
            .iter()
            .map(|text| crate::tokenizer::tokenize(text))
            .collect();

        let embedder = Embedder::new(config.embedder.clone())?;
        let embeddings = embedder.embed_documents(&preprocessed);
        let failed = embeddings.iter().filter(|e| e.is_empty()).count();
        if failed > 0 {
            warn!(failed, "some questions could not be embedded");
        }

        Self::assemble(documents, tokenized_corpus, embeddings, embedder)
    }

    fn assemble(
        documents: Vec<Document>,
        tokenized_corpus: Vec<Vec<String>>,
        embeddings: Vec<Embedding>,
        embedder: Embedder,
    ) -> Result<Self> {
        if embeddings.len() != documents.len()
            || tokenized_corpus.len() != documents.len()
        {
            return Err(Error::Embedding(format!(
                "{} documents but {} embeddings and {} token lists",
                documents.len(),
                embeddings.len(),
                tokenized_corpus.len()
            )));
        }

        let lexical = LexicalIndex::build(&tokenized_corpus)?;
        Ok(Self {
            documents,
            tokenized_corpus,
            lexical,
            vectors: VectorIndex::new(embeddings),
            embedder,
        })
    }

    pub fn from_stored(stored: StoredIndex) -> Result<Self> {
        let embedder = Embedder::restore(stored.embedder)?;
        Self::assemble(
            stored.documents,
            stored.tokenized_corpus,
            stored.embeddings,
            embedder,
        )
    }

    pub fn to_stored(&self) -> StoredIndex {
        StoredIndex {
            documents: self.documents.clone(),
            tokenized_corpus: self.tokenized_corpus.clone(),
            embeddings: self.vectors.embeddings().to_vec(),
            embedder: self.embedder.snapshot(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn document(&self, doc_id: DocId) -> Option<&Document> {
        self.documents.get(doc_id)
    }

    pub fn tokenized_corpus(&self) -> &[Vec<String>] {
        &self.tokenized_corpus
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Vector-only search for an already preprocessed query.
    pub fn vector_search(
        &self,
        preprocessed_query: &str,
        top_k: usize,
    ) -> Vec<ScoredDocument> {
        let query_embedding = self.embedder.embed_query(preprocessed_query);
        self.vectors
            .search(&query_embedding, top_k)
            .into_iter()
            .filter_map(|hit| {
                self.document(hit.doc_id)
                    .map(|doc| ScoredDocument::new(hit.doc_id, doc, hit.score))
            })
            .collect()
    }
}

/// The FAQ index for one storage location.
#[derive(Debug)]
pub struct FaqIndex {
    config: Config,
    tokenizer: Tokenizer,
    store_dir: PathBuf,
    current: RwLock<Option<Arc<IndexSnapshot>>>,
}

impl FaqIndex {
    /// An empty index that persists to `store_dir`.
    pub fn new(config: Config, store_dir: impl Into<PathBuf>) -> Self {
        let tokenizer = Tokenizer::new(&config.keywords.weighted);
        Self {
            config,
            tokenizer,
            store_dir: store_dir.into(),
            current: RwLock::new(None),
        }
    }

    /// An empty index persisting to the data directory's vector store.
    pub fn for_data_dir(data_dir: &DataDir, config: Config) -> Self {
        Self::new(config, data_dir.vector_store_dir())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    pub fn store_file(&self) -> PathBuf {
        self.store_dir.join(VECTOR_STORE_FILE)
    }

    /// The current snapshot, if an index has been built or loaded.
    pub fn snapshot(&self) -> Option<Arc<IndexSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_some()
    }

    /// Number of indexed documents; 0 when no index is loaded.
    pub fn len(&self) -> usize {
        self.snapshot().map_or(0, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, snapshot: IndexSnapshot) {
        let snapshot = Arc::new(snapshot);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) =
            Some(snapshot);
    }

    /// Build an index over `documents` and make it current.
    ///
    /// Documents with a blank question are skipped. Returns `false` and
    /// keeps the previous index when nothing could be indexed.
    pub fn create_index(&self, documents: Vec<Document>) -> bool {
        match self.try_create_index(documents) {
            Ok(count) => {
                info!(documents = count, "index built");
                true
            }
            Err(e) => {
                error!(error = %e, "failed to build index");
                false
            }
        }
    }

    /// Fallible form of [`create_index`](Self::create_index); returns the
    /// number of indexed documents.
    pub fn try_create_index(&self, documents: Vec<Document>) -> Result<usize> {
        let total = documents.len();
        let valid: Vec<Document> =
            documents.into_iter().filter(Document::is_valid).collect();
        if valid.len() < total {
            warn!(
                skipped = total - valid.len(),
                "skipping documents without a question"
            );
        }
        if valid.is_empty() {
            return Err(Error::Corpus("no documents with a question".into()));
        }

        let snapshot =
            IndexSnapshot::build(valid, &self.tokenizer, &self.config)?;
        let count = snapshot.len();
        self.publish(snapshot);
        Ok(count)
    }

    /// Vector-only search: the `top_k` documents whose questions are most
    /// similar to `query`, best first.
    pub fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Vec<ScoredDocument> {
        let Some(snapshot) = self.snapshot() else {
            debug!("similarity search without an index");
            return Vec::new();
        };
        let preprocessed = self.tokenizer.preprocess(query);
        if preprocessed.is_empty() {
            return Vec::new();
        }
        snapshot.vector_search(&preprocessed, top_k)
    }

    /// Persist the current index. Returns `false` when there is no index or
    /// writing fails.
    pub fn save(&self) -> bool {
        match self.try_save() {
            Ok(()) => true,
            Err(e) => {
                error!(
                    error = %e,
                    path = %self.store_file().display(),
                    "failed to save index"
                );
                false
            }
        }
    }

    pub fn try_save(&self) -> Result<()> {
        let snapshot = self.snapshot().ok_or(Error::NotFound {
            kind: "index",
            name: "current".into(),
        })?;

        std::fs::create_dir_all(&self.store_dir)?;
        let path = self.store_file();
        store::write(&path, &snapshot.to_stored())?;
        info!(
            documents = snapshot.len(),
            path = %path.display(),
            "index saved"
        );
        Ok(())
    }

    /// Replace the current index with the persisted one.
    ///
    /// Returns `false` when nothing is saved or the file cannot be read;
    /// the current index is kept in both cases.
    pub fn load(&self) -> bool {
        match self.try_load() {
            Ok(loaded) => loaded,
            Err(e) => {
                error!(
                    error = %e,
                    path = %self.store_file().display(),
                    "failed to load index"
                );
                false
            }
        }
    }

    /// Fallible form of [`load`](Self::load); `Ok(false)` means there is no
    /// saved index.
    pub fn try_load(&self) -> Result<bool> {
        let path = self.store_file();
        let Some(stored) = store::read(&path)? else {
            debug!(path = %path.display(), "no saved index");
            return Ok(false);
        };

        let snapshot = IndexSnapshot::from_stored(stored)?;
        info!(
            documents = snapshot.len(),
            path = %path.display(),
            "index loaded"
        );
        self.publish(snapshot);
        Ok(true)
    }
}
