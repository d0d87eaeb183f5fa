use rayon::prelude::*;

use crate::document::DocId;

/// A dense embedding. Empty means the text could not be embedded.
pub type Embedding = Vec<f32>;

/// Norms below this are treated as zero when normalizing.
pub const NORM_FLOOR: f32 = 1e-10;

/// Scale `v` to unit length in place. Vectors whose norm is below
/// [`NORM_FLOOR`] are left as they are.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    let divisor = if norm < NORM_FLOOR { 1.0 } else { norm };
    for x in v.iter_mut() {
        *x /= divisor;
    }
}

/// Cosine similarity clamped to `[-1, 1]`.
///
/// Returns 0.0 when either vector is empty, all zeros, or the lengths
/// differ.
///
/// # Examples
///
/// ```
/// use faqmatch::vector_index::cosine_similarity;
///
/// assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
/// assert_eq!(cosine_similarity(&[2.0, 0.0], &[3.0, 0.0]), 1.0);
/// assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    if cosine.is_nan() {
        0.0
    } else {
        cosine.clamp(-1.0, 1.0)
    }
}

/// A vector hit before it is joined with its document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorHit {
    pub doc_id: DocId,
    pub score: f32,
}

/// Document embeddings aligned by `doc_id`, searched by linear scan.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    embeddings: Vec<Embedding>,
}

impl VectorIndex {
    pub fn new(embeddings: Vec<Embedding>) -> Self {
        Self { embeddings }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    /// Length of the stored non-empty embeddings, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.embeddings
            .iter()
            .find(|e| !e.is_empty())
            .map(Vec::len)
    }

    /// The `top_k` most similar documents to `query`, best first.
    ///
    /// Documents with an empty embedding are skipped. Equal scores keep
    /// `doc_id` order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Vec<VectorHit> {
        if top_k == 0 || query.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<VectorHit> = self
            .embeddings
            .par_iter()
            .enumerate()
            .filter(|(_, embedding)| !embedding.is_empty())
            .map(|(doc_id, embedding)| VectorHit {
                doc_id,
                score: cosine_similarity(query, embedding),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        hits
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn normalize_to_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector() {
        let mut v = vec![0.0; 4];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0; 4]);

        let mut tiny = vec![1e-12, 0.0];
        l2_normalize(&mut tiny);
        assert_eq!(tiny, vec![1e-12, 0.0]);
    }

    #[test]
    fn cosine_of_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn cosine_opposite_vectors() {
        let c = cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]);
        assert!((c + 1.0).abs() < 1e-6);
    }

    #[test]
    fn search_ranks_by_similarity() {
        let index = VectorIndex::new(vec![
            vec![0.0, 1.0],
            vec![1.0, 0.0],
            vec![0.7, 0.7],
        ]);
        let hits = index.search(&[1.0, 0.1], 3);
        let order: Vec<DocId> = hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn search_skips_empty_embeddings_and_truncates() {
        let index =
            VectorIndex::new(vec![vec![], vec![1.0, 0.0], vec![0.0, 1.0]]);
        let hits = index.search(&[1.0, 0.0], 5);
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.doc_id != 0));

        assert_eq!(index.search(&[1.0, 0.0], 1).len(), 1);
        assert!(index.search(&[1.0, 0.0], 0).is_empty());
        assert_eq!(index.dimension(), Some(2));
    }

    #[test]
    fn ties_keep_doc_order() {
        let index = VectorIndex::new(vec![vec![1.0, 0.0]; 4]);
        let order: Vec<DocId> =
            index.search(&[1.0, 0.0], 4).iter().map(|h| h.doc_id).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    fn vector() -> impl Strategy<Value = Vec<f32>> {
        prop::collection::vec(-100.0f32..100.0, 8)
    }

    proptest! {
        #[test]
        fn cosine_is_symmetric_and_bounded(a in vector(), b in vector()) {
            let ab = cosine_similarity(&a, &b);
            let ba = cosine_similarity(&b, &a);
            prop_assert!((ab - ba).abs() < 1e-5);
            prop_assert!((-1.0..=1.0).contains(&ab));
        }

        #[test]
        fn self_similarity_is_one(a in vector()) {
            prop_assume!(a.iter().map(|x| x * x).sum::<f32>() > 1e-6);
            prop_assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-4);
        }
    }
}
