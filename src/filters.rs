//! Relevance and confidence checks applied to scored candidates.
//!
//! Each check is a named [`RelevanceFilter`]. A [`FilterPipeline`] runs them
//! in order and stops at the first rejection, so the cheapest checks go
//! first.

use std::{collections::BTreeSet, fmt, sync::Arc};

use crate::{
    config::{KeywordConfig, RetrievalConfig},
    document::Document,
    tokenizer::match_terms,
};

/// Outcome of one filter for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Reject(String),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// The query as the filters see it, computed once per retrieval.
#[derive(Debug, Clone)]
pub struct QueryContext {
    raw: String,
    lowered: String,
    terms: BTreeSet<String>,
}

impl QueryContext {
    pub fn new(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            lowered: raw.to_lowercase(),
            terms: match_terms(raw),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn lowered(&self) -> &str {
        &self.lowered
    }

    pub fn terms(&self) -> &BTreeSet<String> {
        &self.terms
    }

    pub fn is_question(&self) -> bool {
        self.raw.contains('?')
    }
}

pub trait RelevanceFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(
        &self,
        query: &QueryContext,
        document: &Document,
        score: f32,
    ) -> Verdict;
}

/// Rejects candidates whose combined score is below a floor.
#[derive(Debug, Clone)]
pub struct MinScore {
    pub min: f32,
}

impl RelevanceFilter for MinScore {
    fn name(&self) -> &'static str {
        "min_score"
    }

    fn evaluate(&self, _: &QueryContext, _: &Document, score: f32) -> Verdict {
        if score < self.min {
            Verdict::Reject(format!("score {score:.3} below {:.3}", self.min))
        } else {
            Verdict::Pass
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NonEmptyAnswer;

impl RelevanceFilter for NonEmptyAnswer {
    fn name(&self) -> &'static str {
        "non_empty_answer"
    }

    fn evaluate(&self, _: &QueryContext, document: &Document, _: f32) -> Verdict {
        if document.answer.trim().is_empty() {
            Verdict::Reject("empty answer".into())
        } else {
            Verdict::Pass
        }
    }
}

/// Requires the query and the document content to share enough match terms.
#[derive(Debug, Clone)]
pub struct TermOverlap {
    pub min_shared: usize,
}

impl RelevanceFilter for TermOverlap {
    fn name(&self) -> &'static str {
        "term_overlap"
    }

    fn evaluate(&self, query: &QueryContext, document: &Document, _: f32) -> Verdict {
        let content = match_terms(&document.content());
        let shared = query.terms().intersection(&content).count();
        if shared < self.min_shared {
            Verdict::Reject(format!(
                "{shared} shared terms, need {}",
                self.min_shared
            ))
        } else {
            Verdict::Pass
        }
    }
}

/// When the query names a core topic keyword, the content must name at least
/// one of the same keywords.
#[derive(Debug, Clone)]
pub struct CoreKeywords {
    pub keywords: Vec<String>,
}

impl RelevanceFilter for CoreKeywords {
    fn name(&self) -> &'static str {
        "core_keywords"
    }

    fn evaluate(&self, query: &QueryContext, document: &Document, _: f32) -> Verdict {
        let in_query: Vec<String> = self
            .keywords
            .iter()
            .map(|k| k.to_lowercase())
            .filter(|k| !k.is_empty() && query.lowered().contains(k.as_str()))
            .collect();
        if in_query.is_empty() {
            return Verdict::Pass;
        }

        let content = document.content().to_lowercase();
        if in_query.iter().any(|k| content.contains(k.as_str())) {
            Verdict::Pass
        } else {
            Verdict::Reject(format!(
                "content lacks query keywords {}",
                in_query.join(", ")
            ))
        }
    }
}

pub type SemanticPredicate =
    dyn Fn(&QueryContext, &Document) -> bool + Send + Sync;

/// Extension point for a semantic relevance check. Passes everything unless
/// a predicate is installed.
#[derive(Clone, Default)]
pub struct SemanticHook {
    predicate: Option<Arc<SemanticPredicate>>,
}

impl SemanticHook {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&QueryContext, &Document) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Some(Arc::new(predicate)),
        }
    }
}

impl fmt::Debug for SemanticHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemanticHook")
            .field("installed", &self.predicate.is_some())
            .finish()
    }
}

impl RelevanceFilter for SemanticHook {
    fn name(&self) -> &'static str {
        "semantic"
    }

    fn evaluate(&self, query: &QueryContext, document: &Document, _: f32) -> Verdict {
        match &self.predicate {
            Some(predicate) if !predicate(query, document) => {
                Verdict::Reject("semantic check failed".into())
            }
            _ => Verdict::Pass,
        }
    }
}

/// Rejects non-committal answers.
#[derive(Debug, Clone)]
pub struct Hedging {
    pub markers: Vec<String>,
}

impl RelevanceFilter for Hedging {
    fn name(&self) -> &'static str {
        "hedging"
    }

    fn evaluate(&self, _: &QueryContext, document: &Document, _: f32) -> Verdict {
        let answer = document.answer.to_lowercase();
        match self
            .markers
            .iter()
            .find(|m| !m.is_empty() && answer.contains(&m.to_lowercase()))
        {
            Some(marker) => Verdict::Reject(format!("hedged answer ({marker})")),
            None => Verdict::Pass,
        }
    }
}

/// A question must be answered with a declarative sentence.
#[derive(Debug, Clone)]
pub struct AssertiveAnswer {
    pub endings: Vec<String>,
}

impl RelevanceFilter for AssertiveAnswer {
    fn name(&self) -> &'static str {
        "assertive_answer"
    }

    fn evaluate(&self, query: &QueryContext, document: &Document, _: f32) -> Verdict {
        if !query.is_question() {
            return Verdict::Pass;
        }
        if self.endings.iter().any(|e| document.answer.contains(e.as_str())) {
            Verdict::Pass
        } else {
            Verdict::Reject("answer has no assertive ending".into())
        }
    }
}

/// Why a candidate was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub filter: &'static str,
    pub reason: String,
}

/// Ordered list of filters; a candidate is kept only if every filter passes.
#[derive(Default)]
pub struct FilterPipeline {
    filters: Vec<Box<dyn RelevanceFilter>>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard cascade: score floor, non-empty answer, term overlap,
    /// core keywords, semantic hook, hedging, assertive answer.
    pub fn standard(
        retrieval: &RetrievalConfig,
        keywords: &KeywordConfig,
        semantic: SemanticHook,
    ) -> Self {
        Self::new()
            .with_filter(MinScore {
                min: retrieval.min_relevance_score,
            })
            .with_filter(NonEmptyAnswer)
            .with_filter(TermOverlap {
                min_shared: retrieval.min_term_overlap,
            })
            .with_filter(CoreKeywords {
                keywords: keywords.core.clone(),
            })
            .with_filter(semantic)
            .with_filter(Hedging {
                markers: keywords.hedges.clone(),
            })
            .with_filter(AssertiveAnswer {
                endings: keywords.assertive_endings.clone(),
            })
    }

    pub fn with_filter(mut self, filter: impl RelevanceFilter + 'static) -> Self {
        self.push(filter);
        self
    }

    pub fn push(&mut self, filter: impl RelevanceFilter + 'static) {
        self.filters.push(Box::new(filter));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run the filters in order; the first rejection wins.
    pub fn check(
        &self,
        query: &QueryContext,
        document: &Document,
        score: f32,
    ) -> Result<(), Rejection> {
        for filter in &self.filters {
            if let Verdict::Reject(reason) = filter.evaluate(query, document, score)
            {
                return Err(Rejection {
                    filter: filter.name(),
                    reason,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard() -> FilterPipeline {
        FilterPipeline::standard(
            &RetrievalConfig::default(),
            &KeywordConfig::default(),
            SemanticHook::default(),
        )
    }

    fn stipend() -> Document {
        Document::new(
            "훈련장려금은 언제 지급되나요?",
            "훈련장려금은 매월 10일에 지급됩니다.",
        )
    }

    #[test]
    fn standard_order() {
        assert_eq!(
            standard().names(),
            vec![
                "min_score",
                "non_empty_answer",
                "term_overlap",
                "core_keywords",
                "semantic",
                "hedging",
                "assertive_answer",
            ]
        );
    }

    #[test]
    fn good_match_passes_everything() {
        let query = QueryContext::new("훈련장려금 지급 시기?");
        assert_eq!(standard().check(&query, &stipend(), 0.85), Ok(()));
    }

    #[test]
    fn min_score_rejects_low_scores() {
        let filter = MinScore { min: 0.6 };
        let query = QueryContext::new("q");
        assert!(!filter.evaluate(&query, &stipend(), 0.59).is_pass());
        assert!(filter.evaluate(&query, &stipend(), 0.6).is_pass());
    }

    #[test]
    fn empty_answer_rejected() {
        let query = QueryContext::new("q");
        let doc = Document::new("q", "  ");
        assert!(!NonEmptyAnswer.evaluate(&query, &doc, 1.0).is_pass());
    }

    #[test]
    fn term_overlap_counts_bigrams() {
        let filter = TermOverlap { min_shared: 3 };
        // 장려, 려금, 지급 are shared.
        let query = QueryContext::new("장려금 지급");
        assert!(filter.evaluate(&query, &stipend(), 1.0).is_pass());

        let unrelated = QueryContext::new("주차장 위치");
        let verdict = filter.evaluate(&unrelated, &stipend(), 1.0);
        assert_eq!(verdict, Verdict::Reject("0 shared terms, need 3".into()));
    }

    #[test]
    fn core_keywords_must_carry_over() {
        let filter = CoreKeywords {
            keywords: vec!["출석".into(), "휴가".into()],
        };
        let query = QueryContext::new("출석 인정 기준");
        assert!(!filter.evaluate(&query, &stipend(), 1.0).is_pass());

        let doc = Document::new("출석 인정은?", "출석은 QR로 인정됩니다.");
        assert!(filter.evaluate(&query, &doc, 1.0).is_pass());

        let no_core = QueryContext::new("장려금");
        assert!(filter.evaluate(&no_core, &stipend(), 1.0).is_pass());
    }

    #[test]
    fn semantic_hook_passes_by_default() {
        let query = QueryContext::new("q");
        assert!(SemanticHook::default().evaluate(&query, &stipend(), 1.0).is_pass());

        let strict = SemanticHook::new(|_, _| false);
        assert!(!strict.evaluate(&query, &stipend(), 1.0).is_pass());
    }

    #[test]
    fn hedged_answer_rejected() {
        let filter = Hedging {
            markers: KeywordConfig::default().hedges,
        };
        let query = QueryContext::new("q");
        let doc = Document::new("장려금 지급?", "보통 2주 정도 걸립니다.");
        assert!(!filter.evaluate(&query, &doc, 1.0).is_pass());
        assert!(filter.evaluate(&query, &stipend(), 1.0).is_pass());
    }

    #[test]
    fn questions_need_assertive_answers() {
        let filter = AssertiveAnswer {
            endings: KeywordConfig::default().assertive_endings,
        };
        let doc = Document::new("장려금", "10일 지급");

        let question = QueryContext::new("장려금 언제?");
        assert!(!filter.evaluate(&question, &doc, 1.0).is_pass());
        assert!(filter.evaluate(&question, &stipend(), 1.0).is_pass());

        let statement = QueryContext::new("장려금 언제");
        assert!(filter.evaluate(&statement, &doc, 1.0).is_pass());
    }

    #[test]
    fn first_rejection_is_reported() {
        let query = QueryContext::new("훈련장려금 지급 시기?");
        let doc = Document::new("훈련장려금 지급", "");
        let rejection = standard().check(&query, &doc, 0.1).unwrap_err();
        assert_eq!(rejection.filter, "min_score");
    }

    #[test]
    fn custom_filters_can_be_appended() {
        struct Never;
        impl RelevanceFilter for Never {
            fn name(&self) -> &'static str {
                "never"
            }
            fn evaluate(&self, _: &QueryContext, _: &Document, _: f32) -> Verdict {
                Verdict::Reject("never".into())
            }
        }

        let mut pipeline = FilterPipeline::new();
        pipeline.push(Never);
        assert_eq!(pipeline.names(), vec!["never"]);
        let query = QueryContext::new("q");
        assert!(pipeline.check(&query, &stipend(), 1.0).is_err());
    }
}
