//! faqmatch - answer questions from a fixed FAQ corpus.
//!
//! Questions are indexed twice: lexically with BM25 via
//! [Tantivy](https://github.com/quickwit-oss/tantivy), and as dense vectors
//! built from character n-gram TF-IDF and a seeded random projection. A query
//! is scored against both, the scores are fused, and a cascade of relevance
//! and confidence filters removes weak or non-committal matches.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use faqmatch::{Config, DataDir, Document, FaqIndex, HybridRetriever};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let index = FaqIndex::for_data_dir(&data_dir, Config::default());
//!
//! index.create_index(vec![Document::new(
//!     "훈련장려금은 언제 지급되나요?",
//!     "훈련장려금은 매월 10일에 지급됩니다.",
//! )]);
//! index.save();
//!
//! let retriever = HybridRetriever::new(Arc::new(index));
//! for r in retriever.retrieve_documents("훈련장려금 지급 시기", Some(1), Some(0.5)) {
//!     println!("{} (score: {:.3})", r.answer, r.score);
//! }
//! ```

pub mod category;
pub mod config;
pub mod corpus;
pub mod data_dir;
pub mod document;
pub mod embedding;
pub mod error;
pub mod filters;
pub mod index;
pub mod lexical_index;
pub mod search;
pub mod store;
pub mod tfidf;
pub mod tokenizer;
pub mod vector_index;

pub use category::Categorizer;
pub use config::Config;
pub use data_dir::DataDir;
pub use document::{DocId, Document, ScoredDocument};
pub use embedding::{Embedder, EmbeddingStrategy};
pub use error::{Error, Result};
pub use index::{FaqIndex, IndexSnapshot};
pub use search::HybridRetriever;
pub use tokenizer::Tokenizer;
