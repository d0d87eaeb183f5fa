use serde::{Deserialize, Serialize};

/// Position of a document in the indexed corpus.
///
/// Assigned when the index is built; it is the join key between the
/// document list, the lexical index and the vector index.
pub type DocId = usize;

/// One question/answer pair of the FAQ corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub question: String,
    pub answer: String,
}

impl Document {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }

    /// A document is indexable when its question has visible text.
    pub fn is_valid(&self) -> bool {
        !self.question.trim().is_empty()
    }

    /// Question and answer joined, as checked by the relevance filters.
    pub fn content(&self) -> String {
        format!("{}\n{}", self.question, self.answer)
    }
}

/// A search hit: the document plus the score it was ranked by.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredDocument {
    pub doc_id: DocId,
    pub question: String,
    pub answer: String,
    pub score: f32,
}

impl ScoredDocument {
    pub fn new(doc_id: DocId, document: &Document, score: f32) -> Self {
        Self {
            doc_id,
            question: document.question.clone(),
            answer: document.answer.clone(),
            score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_question_is_invalid() {
        assert!(!Document::new("  \n", "answer").is_valid());
        assert!(Document::new("q", "").is_valid());
    }

    #[test]
    fn content_joins_both_fields() {
        let doc = Document::new("언제 시작하나요?", "9시에 시작합니다.");
        assert_eq!(doc.content(), "언제 시작하나요?\n9시에 시작합니다.");
    }

    #[test]
    fn scored_document_serializes_flat() {
        let doc = Document::new("q", "a");
        let scored = ScoredDocument::new(4, &doc, 0.5);
        let json = serde_json::to_value(&scored).unwrap();
        assert_eq!(json["doc_id"], 4);
        assert_eq!(json["question"], "q");
        assert_eq!(json["answer"], "a");
        assert_eq!(json["score"], 0.5);
    }
}
