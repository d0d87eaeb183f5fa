//! Topic labels for FAQ entries.
//!
//! Each category is scored by keyword containment: a keyword found in the
//! question adds 2, found in the answer adds 1. The highest score wins, the
//! earlier category on a tie, and an entry that matches nothing is
//! [`UNCATEGORIZED`].

use crate::{config::Category, document::Document};

/// Label for entries that match no category keyword.
pub const UNCATEGORIZED: &str = "기타";

const QUESTION_WEIGHT: usize = 2;
const ANSWER_WEIGHT: usize = 1;

#[derive(Debug, Clone)]
pub struct Categorizer {
    categories: Vec<Category>,
}

impl Categorizer {
    pub fn new(categories: &[Category]) -> Self {
        let categories = categories
            .iter()
            .map(|c| Category {
                name: c.name.clone(),
                keywords: c
                    .keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect(),
            })
            .collect();
        Self { categories }
    }

    /// Per-category scores for `document`, in table order.
    pub fn scores(&self, document: &Document) -> Vec<usize> {
        let question = document.question.to_lowercase();
        let answer = document.answer.to_lowercase();

        self.categories
            .iter()
            .map(|category| {
                category
                    .keywords
                    .iter()
                    .map(|k| {
                        let mut score = 0;
                        if question.contains(k.as_str()) {
                            score += QUESTION_WEIGHT;
                        }
                        if answer.contains(k.as_str()) {
                            score += ANSWER_WEIGHT;
                        }
                        score
                    })
                    .sum()
            })
            .collect()
    }

    fn best(&self, document: &Document) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for (i, score) in self.scores(document).into_iter().enumerate() {
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((i, score));
            }
        }
        best.map(|(i, _)| i)
    }

    pub fn categorize(&self, document: &Document) -> &str {
        self.best(document)
            .map_or(UNCATEGORIZED, |i| self.categories[i].name.as_str())
    }

    /// Number of documents per category, in table order with
    /// [`UNCATEGORIZED`] last. Categories without documents are left out.
    pub fn counts<'d>(
        &self,
        documents: impl IntoIterator<Item = &'d Document>,
    ) -> Vec<(&str, usize)> {
        let mut counts = vec![0usize; self.categories.len() + 1];
        for document in documents {
            let slot = self.best(document).unwrap_or(self.categories.len());
            counts[slot] += 1;
        }

        self.categories
            .iter()
            .map(|c| c.name.as_str())
            .chain(std::iter::once(UNCATEGORIZED))
            .zip(counts)
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}
