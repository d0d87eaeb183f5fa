use tantivy::{
    DocAddress,
    Index,
    IndexReader,
    ReloadPolicy,
    Score,
    TantivyDocument,
    Term,
    collector::TopDocs,
    doc,
    query::{BooleanQuery, Occur, Query, TermQuery},
    schema::*,
    tokenizer::{LowerCaser, RemoveLongFilter, TextAnalyzer, WhitespaceTokenizer},
};

use crate::{document::DocId, error::Result};

/// Field names used in the schema.
pub mod fields {
    pub const DOC_ID: &str = "doc_id";
    pub const TOKENS: &str = "tokens";
}

const TOKENIZER_NAME: &str = "faq_whitespace";
const WRITER_MEMORY_BUDGET: usize = 15_000_000;

/// BM25 index over pre-tokenized questions.
///
/// Questions arrive already normalized and split, so the analyzer only splits
/// on whitespace and lowercases. The index lives in RAM and is rebuilt from
/// the token lists whenever the corpus changes.
pub struct LexicalIndex {
    reader: IndexReader,
    doc_id: Field,
    tokens: Field,
    len: usize,
}

fn build_schema() -> (Schema, Field, Field) {
    let mut builder = Schema::builder();

    let doc_id = builder.add_u64_field(fields::DOC_ID, STORED | FAST);
    let token_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER_NAME)
            .set_index_option(IndexRecordOption::WithFreqs),
    );
    let tokens = builder.add_text_field(fields::TOKENS, token_opts);

    (builder.build(), doc_id, tokens)
}

fn register_tokenizer(index: &Index) {
    let analyzer = TextAnalyzer::builder(WhitespaceTokenizer::default())
        .filter(RemoveLongFilter::limit(120))
        .filter(LowerCaser)
        .build();
    index.tokenizers().register(TOKENIZER_NAME, analyzer);
}

impl LexicalIndex {
    /// Index one token list per document; list `i` becomes `doc_id` `i`.
    pub fn build(tokenized_corpus: &[Vec<String>]) -> Result<Self> {
        let (schema, doc_id, tokens) = build_schema();
        let index = Index::create_in_ram(schema);
        register_tokenizer(&index);

        let mut writer = index.writer(WRITER_MEMORY_BUDGET)?;
        for (id, doc_tokens) in tokenized_corpus.iter().enumerate() {
            writer.add_document(doc!(
                doc_id => id as u64,
                tokens => doc_tokens.join(" "),
            ))?;
        }
        writer.commit()?;

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        reader.reload()?;

        Ok(Self {
            reader,
            doc_id,
            tokens,
            len: tokenized_corpus.len(),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// BM25 score of every document for the query tokens, indexed by
    /// `doc_id`.
    ///
    /// Each query token is its own clause, so a token repeated in the query
    /// adds its contribution once per occurrence. Documents sharing no token
    /// score 0.
    pub fn score(&self, query_tokens: &[String]) -> Result<Vec<f32>> {
        let mut scores = vec![0.0f32; self.len];
        if query_tokens.is_empty() || self.len == 0 {
            return Ok(scores);
        }

        let clauses: Vec<(Occur, Box<dyn Query>)> = query_tokens
            .iter()
            .map(|token| {
                let term =
                    Term::from_field_text(self.tokens, &token.to_lowercase());
                let query: Box<dyn Query> =
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                (Occur::Should, query)
            })
            .collect();
        let query = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let top_docs: Vec<(Score, DocAddress)> =
            searcher.search(&query, &TopDocs::with_limit(self.len))?;

        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let id = extract_u64(&doc, self.doc_id) as DocId;
            if let Some(slot) = scores.get_mut(id) {
                *slot = score;
            }
        }

        Ok(scores)
    }
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex")
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}

/// Divide by the largest score so the best match scores 1.0. All-zero input
/// stays zero.
pub fn max_normalize(scores: &mut [f32]) {
    let max = scores.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        for s in scores.iter_mut() {
            *s /= max;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    fn corpus() -> Vec<Vec<String>> {
        vec![
            tokens("출석 체크 방법 출석 출석"),
            tokens("장려금 지급 시기 장려금 장려금"),
            tokens("휴게실 위치"),
        ]
    }

    #[test]
    fn scores_are_aligned_with_documents() {
        let index = LexicalIndex::build(&corpus()).unwrap();
        let scores = index.score(&tokens("장려금 지급")).unwrap();

        assert_eq!(scores.len(), 3);
        assert!(scores[1] > 0.0);
        assert_eq!(scores[0], 0.0);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn empty_query_scores_zero() {
        let index = LexicalIndex::build(&corpus()).unwrap();
        assert_eq!(index.score(&[]).unwrap(), vec![0.0; 3]);
        assert_eq!(index.score(&tokens("없는단어")).unwrap(), vec![0.0; 3]);
    }

    #[test]
    fn repeated_query_tokens_add_up() {
        let index = LexicalIndex::build(&corpus()).unwrap();
        let once = index.score(&tokens("휴게실")).unwrap()[2];
        let twice = index.score(&tokens("휴게실 휴게실")).unwrap()[2];
        assert!(twice > once);
    }

    #[test]
    fn empty_corpus() {
        let index = LexicalIndex::build(&[]).unwrap();
        assert!(index.is_empty());
        assert!(index.score(&tokens("anything")).unwrap().is_empty());
    }

    #[test]
    fn query_is_case_insensitive() {
        let index =
            LexicalIndex::build(&[tokens("rust programming"), tokens("go")])
                .unwrap();
        let scores = index.score(&tokens("RUST")).unwrap();
        assert!(scores[0] > 0.0);
    }

    #[test]
    fn max_normalize_scales_to_one() {
        let mut scores = vec![2.0, 4.0, 0.0];
        max_normalize(&mut scores);
        assert_eq!(scores, vec![0.5, 1.0, 0.0]);

        let mut zeros = vec![0.0; 3];
        max_normalize(&mut zeros);
        assert_eq!(zeros, vec![0.0; 3]);
    }
}
