use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, trace};

use crate::{
    document::{DocId, ScoredDocument},
    error::Result,
    filters::{FilterPipeline, QueryContext, SemanticHook},
    index::FaqIndex,
    lexical_index::max_normalize,
    tokenizer::tokenize,
};

/// Ranks documents by a weighted mix of vector and BM25 similarity, then
/// drops candidates the relevance filters reject.
pub struct HybridRetriever {
    index: Arc<FaqIndex>,
    pipeline: FilterPipeline,
}

impl HybridRetriever {
    /// A retriever with the standard filter cascade built from the index's
    /// configuration.
    pub fn new(index: Arc<FaqIndex>) -> Self {
        let config = index.config();
        let pipeline = FilterPipeline::standard(
            &config.retrieval,
            &config.keywords,
            SemanticHook::default(),
        );
        Self { index, pipeline }
    }

    pub fn with_pipeline(index: Arc<FaqIndex>, pipeline: FilterPipeline) -> Self {
        Self { index, pipeline }
    }

    pub fn index(&self) -> &FaqIndex {
        &self.index
    }

    pub fn pipeline(&self) -> &FilterPipeline {
        &self.pipeline
    }

    /// Retrieve up to `top_k` documents scoring at least `threshold`, best
    /// first. `None` uses the configured defaults.
    ///
    /// Never fails: errors are logged and give an empty result.
    pub fn retrieve_documents(
        &self,
        query: &str,
        top_k: Option<usize>,
        threshold: Option<f32>,
    ) -> Vec<ScoredDocument> {
        match self.try_retrieve(query, top_k, threshold) {
            Ok(results) => results,
            Err(e) => {
                error!(error = %e, query, "retrieval failed");
                Vec::new()
            }
        }
    }

    /// Execute the retrieval pipeline.
    ///
    /// 1. Preprocess the query (normalization and keyword weighting)
    /// 2. BM25 over every question, scaled so the best scores 1.0
    /// 3. Vector search for `top_k * overfetch_factor` candidates
    /// 4. Combine the two scores and drop candidates below `threshold`
    /// 5. Run the relevance filters
    /// 6. Sort by combined score and keep `top_k`
    ///
    /// The combined score is `vector_weight * cosine + lexical_weight * bm25`
    /// where `bm25` is divided by the query's best BM25 score, not raw. Both
    /// terms lie in [0, 1], so `threshold` is an absolute bound on that
    /// scale: with the default weights a document that is the best lexical
    /// match gains 0.1 no matter how large its raw BM25 score is.
    pub fn try_retrieve(
        &self,
        query: &str,
        top_k: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Vec<ScoredDocument>> {
        let retrieval = &self.index.config().retrieval;
        let top_k = top_k.unwrap_or(retrieval.top_k);
        let threshold = threshold.unwrap_or(retrieval.threshold);

        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let Some(snapshot) = self.index.snapshot() else {
            debug!("retrieval without an index");
            return Ok(Vec::new());
        };

        let preprocessed = self.index.tokenizer().preprocess(query);
        if preprocessed.is_empty() {
            return Ok(Vec::new());
        }

        // Stage 1: lexical scores for the whole corpus
        let mut lexical = snapshot.lexical().score(&tokenize(&preprocessed))?;
        max_normalize(&mut lexical);

        // Stage 2: vector candidates
        let candidate_count = top_k.saturating_mul(retrieval.overfetch_factor);
        let candidates = snapshot.vector_search(&preprocessed, candidate_count);

        // Stage 3: fuse, threshold, filter
        let context = QueryContext::new(query);
        let mut results = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let bm25 = lexical.get(candidate.doc_id).copied().unwrap_or(0.0);
            let combined = retrieval.vector_weight * candidate.score
                + retrieval.lexical_weight * bm25;

            if combined < threshold {
                trace!(
                    doc_id = candidate.doc_id,
                    score = combined,
                    "below threshold"
                );
                continue;
            }

            let Some(document) = snapshot.document(candidate.doc_id) else {
                continue;
            };
            if let Err(rejection) =
                self.pipeline.check(&context, document, combined)
            {
                debug!(
                    doc_id = candidate.doc_id,
                    score = combined,
                    filter = rejection.filter,
                    reason = %rejection.reason,
                    "candidate rejected"
                );
                continue;
            }

            results.push(ScoredDocument {
                score: combined,
                ..candidate
            });
        }

        // Stage 4: rank and limit
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);

        Ok(results)
    }
}

impl std::fmt::Debug for HybridRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRetriever")
            .field("documents", &self.index.len())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

/// A result as presented to the user, with its 1-based rank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    pub rank: usize,
    pub doc_id: DocId,
    pub score: f32,
    pub question: String,
    pub answer: String,
}

pub fn rank(results: Vec<ScoredDocument>) -> Vec<RankedResult> {
    results
        .into_iter()
        .enumerate()
        .map(|(i, r)| RankedResult {
            rank: i + 1,
            doc_id: r.doc_id,
            score: r.score,
            question: r.question,
            answer: r.answer,
        })
        .collect()
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    query: &'a str,
    result_count: usize,
    results: &'a [RankedResult],
}

/// Render results as a JSON object with the query and result count.
pub fn to_json(results: &[RankedResult], query: &str) -> Result<String> {
    Ok(serde_json::to_string(&JsonOutput {
        query,
        result_count: results.len(),
        results,
    })?)
}

/// Format results for human-readable terminal output.
pub fn format_human(results: &[RankedResult]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for r in results {
        println!("{:>3}. [{:.3}] #{} {}", r.rank, r.score, r.doc_id, r.question);
        for line in r.answer.lines() {
            println!("     {line}");
        }
    }
    println!("\n{} result(s)", results.len());
}

/// Format results as JSON output.
pub fn format_json(results: &[RankedResult], query: &str) -> Result<()> {
    println!("{}", to_json(results, query)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, document::Document, filters::MinScore};

    fn setup_index() -> (Arc<FaqIndex>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let index =
            FaqIndex::new(Config::default(), tmp.path().join("vector_store"));
        assert!(index.create_index(vec![
            Document::new(
                "훈련장려금은 언제 지급되나요?",
                "훈련장려금은 매월 10일에 지급됩니다.",
            ),
            Document::new("휴게실은 어디에 있나요?", "휴게실은 3층에 있습니다."),
            Document::new("노트북을 대여할 수 있나요?", "신청하면 대여해 드립니다."),
        ]));
        (Arc::new(index), tmp)
    }

    #[test]
    fn finds_matching_document() {
        let (index, _tmp) = setup_index();
        let retriever = HybridRetriever::new(index);

        let results =
            retriever.retrieve_documents("훈련장려금 지급 시기", Some(1), Some(0.5));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].doc_id, 0);
        assert!(results[0].score >= 0.5);
    }

    #[test]
    fn blank_query_returns_nothing() {
        let (index, _tmp) = setup_index();
        let retriever = HybridRetriever::new(index);
        assert!(retriever.retrieve_documents("", None, Some(0.0)).is_empty());
        assert!(retriever.retrieve_documents("   ", None, Some(0.0)).is_empty());
        assert!(retriever.retrieve_documents("?!", None, Some(0.0)).is_empty());
    }

    #[test]
    fn zero_top_k_returns_nothing() {
        let (index, _tmp) = setup_index();
        let retriever = HybridRetriever::new(index);
        assert!(
            retriever
                .retrieve_documents("훈련장려금 지급 시기", Some(0), Some(0.0))
                .is_empty()
        );
    }

    #[test]
    fn without_index_returns_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let index = FaqIndex::new(Config::default(), tmp.path());
        let retriever = HybridRetriever::new(Arc::new(index));
        assert!(retriever.retrieve_documents("휴게실", None, None).is_empty());
    }

    #[test]
    fn custom_pipeline_replaces_filters() {
        let (index, _tmp) = setup_index();
        let retriever = HybridRetriever::with_pipeline(
            index,
            FilterPipeline::new().with_filter(MinScore { min: 0.0 }),
        );
        let results = retriever.retrieve_documents("휴게실", Some(3), Some(0.0));
        assert!(!results.is_empty());
        assert_eq!(retriever.pipeline().names(), vec!["min_score"]);
    }

    #[test]
    fn results_are_sorted_by_score() {
        let (index, _tmp) = setup_index();
        let retriever = HybridRetriever::with_pipeline(index, FilterPipeline::new());
        let results = retriever.retrieve_documents("휴게실 위치", Some(3), Some(-1.0));
        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(results[0].doc_id, 1);
    }

    #[test]
    fn ranks_are_one_based() {
        let doc = Document::new("q", "a");
        let ranked = rank(vec![
            ScoredDocument::new(4, &doc, 0.9),
            ScoredDocument::new(2, &doc, 0.8),
        ]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].rank, 2);
        assert_eq!(ranked[1].doc_id, 2);
    }

    #[test]
    fn json_output_shape() {
        let doc = Document::new("질문", "답변입니다.");
        let ranked = rank(vec![ScoredDocument::new(0, &doc, 0.75)]);
        let json: serde_json::Value =
            serde_json::from_str(&to_json(&ranked, "질문?").unwrap()).unwrap();

        assert_eq!(json["query"], "질문?");
        assert_eq!(json["result_count"], 1);
        assert_eq!(json["results"][0]["rank"], 1);
        assert_eq!(json["results"][0]["doc_id"], 0);
        assert_eq!(json["results"][0]["answer"], "답변입니다.");
        assert_eq!(json["results"][0]["score"], 0.75);
    }
}
