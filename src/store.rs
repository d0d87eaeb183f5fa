use std::path::{Path, PathBuf};

use redb::{
    Database,
    ReadOnlyTable,
    ReadableDatabase,
    ReadableTable,
    TableDefinition,
};

use crate::{
    document::Document,
    embedding::EmbedderSnapshot,
    error::{Error, Result},
    vector_index::Embedding,
};

const QUESTIONS: TableDefinition<u64, &str> = TableDefinition::new("questions");
const ANSWERS: TableDefinition<u64, &str> = TableDefinition::new("answers");
const EMBEDDINGS: TableDefinition<u64, &[u8]> =
    TableDefinition::new("embeddings");
const TOKENS: TableDefinition<u64, &str> = TableDefinition::new("tokens");
const METADATA: TableDefinition<&str, &str> = TableDefinition::new("metadata");

const FORMAT_VERSION: &str = "1";

mod keys {
    pub const FORMAT_VERSION: &str = "format_version";
    pub const DOCUMENT_COUNT: &str = "document_count";
    pub const EMBEDDER: &str = "embedder";
}

/// Header size: 4 bytes embedding dimension.
const HEADER_SIZE: usize = 4;

/// The persisted form of an index: everything except the BM25 structure,
/// which is rebuilt from `tokenized_corpus`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredIndex {
    pub documents: Vec<Document>,
    pub tokenized_corpus: Vec<Vec<String>>,
    pub embeddings: Vec<Embedding>,
    pub embedder: EmbedderSnapshot,
}

/// Write `index` to a redb file at `path`, replacing any previous contents.
///
/// The database is built in a sibling `.tmp` file and renamed over `path`
/// once committed, so a failed save leaves the previous file intact and a
/// damaged file at `path` is simply replaced.
///
/// Embedding entries are a 4-byte little-endian dimension followed by that
/// many f32 values in native byte order. Token lists are stored space-joined.
pub fn write(path: &Path, index: &StoredIndex) -> Result<()> {
    let n = index.documents.len();
    if index.embeddings.len() != n || index.tokenized_corpus.len() != n {
        return Err(Error::CorruptStore(format!(
            "refusing to save {n} documents with {} embeddings and {} token lists",
            index.embeddings.len(),
            index.tokenized_corpus.len()
        )));
    }

    let embedder = serde_json::to_string(&index.embedder)?;
    let tmp = temp_path(path);
    if tmp.exists() {
        std::fs::remove_file(&tmp)?;
    }

    if let Err(e) = write_database(&tmp, index, &embedder) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_database(
    path: &Path,
    index: &StoredIndex,
    embedder: &str,
) -> Result<()> {
    let db = Database::create(path)?;

    let txn = db.begin_write()?;
    {
        let mut questions = txn.open_table(QUESTIONS)?;
        let mut answers = txn.open_table(ANSWERS)?;
        let mut embeddings = txn.open_table(EMBEDDINGS)?;
        let mut tokens = txn.open_table(TOKENS)?;

        for (i, doc) in index.documents.iter().enumerate() {
            let id = i as u64;
            questions.insert(id, doc.question.as_str())?;
            answers.insert(id, doc.answer.as_str())?;
            let encoded = encode_embedding(&index.embeddings[i]);
            embeddings.insert(id, encoded.as_slice())?;
            tokens.insert(id, index.tokenized_corpus[i].join(" ").as_str())?;
        }

        let mut metadata = txn.open_table(METADATA)?;
        metadata.insert(keys::FORMAT_VERSION, FORMAT_VERSION)?;
        let count = index.documents.len().to_string();
        metadata.insert(keys::DOCUMENT_COUNT, count.as_str())?;
        metadata.insert(keys::EMBEDDER, embedder)?;
    }
    txn.commit()?;
    Ok(())
}

/// Read an index written by [`write`].
///
/// Returns `Ok(None)` when there is no file at `path`. Every table is
/// checked against the recorded document count, and every non-empty
/// embedding against the embedder's dimension.
pub fn read(path: &Path) -> Result<Option<StoredIndex>> {
    if !path.exists() {
        return Ok(None);
    }

    let db = Database::open(path)?;
    let txn = db.begin_read()?;

    let metadata = txn.open_table(METADATA)?;
    let meta = |key: &str| -> Result<String> {
        metadata
            .get(key)?
            .map(|v| v.value().to_string())
            .ok_or_else(|| {
                Error::CorruptStore(format!("missing metadata key {key}"))
            })
    };

    let version = meta(keys::FORMAT_VERSION)?;
    if version != FORMAT_VERSION {
        return Err(Error::CorruptStore(format!(
            "unsupported format version {version}"
        )));
    }
    let count: usize = meta(keys::DOCUMENT_COUNT)?.parse().map_err(|_| {
        Error::CorruptStore("document count is not a number".into())
    })?;
    let embedder: EmbedderSnapshot =
        serde_json::from_str(&meta(keys::EMBEDDER)?)?;

    let questions =
        read_strings(&txn.open_table(QUESTIONS)?, count, "questions")?;
    let answers = read_strings(&txn.open_table(ANSWERS)?, count, "answers")?;
    let tokenized_corpus =
        read_strings(&txn.open_table(TOKENS)?, count, "tokens")?
            .iter()
            .map(|line| line.split_whitespace().map(str::to_string).collect())
            .collect::<Vec<Vec<String>>>();
    let embeddings = read_embeddings(&txn.open_table(EMBEDDINGS)?, count)?;

    let dimension = embedder.config.vector_size;
    if let Some((i, e)) = embeddings
        .iter()
        .enumerate()
        .find(|(_, e)| !e.is_empty() && e.len() != dimension)
    {
        return Err(Error::CorruptStore(format!(
            "embedding {i} has dimension {}, expected {dimension}",
            e.len()
        )));
    }

    let documents = questions
        .into_iter()
        .zip(answers)
        .map(|(question, answer)| Document { question, answer })
        .collect();

    Ok(Some(StoredIndex {
        documents,
        tokenized_corpus,
        embeddings,
        embedder,
    }))
}

fn check_key(key: u64, expected: usize, name: &str) -> Result<()> {
    if key != expected as u64 {
        return Err(Error::CorruptStore(format!(
            "{name} table has a gap at key {expected}"
        )));
    }
    Ok(())
}

fn check_count(found: usize, count: usize, name: &str) -> Result<()> {
    if found != count {
        return Err(Error::CorruptStore(format!(
            "{name} table has {found} rows, expected {count}"
        )));
    }
    Ok(())
}

fn read_strings(
    table: &ReadOnlyTable<u64, &'static str>,
    count: usize,
    name: &str,
) -> Result<Vec<String>> {
    let mut rows = Vec::with_capacity(count);
    for entry in table.iter()? {
        let (key, value) = entry?;
        check_key(key.value(), rows.len(), name)?;
        rows.push(value.value().to_string());
    }
    check_count(rows.len(), count, name)?;
    Ok(rows)
}

fn read_embeddings(
    table: &ReadOnlyTable<u64, &'static [u8]>,
    count: usize,
) -> Result<Vec<Embedding>> {
    let mut rows = Vec::with_capacity(count);
    for entry in table.iter()? {
        let (key, value) = entry?;
        check_key(key.value(), rows.len(), "embeddings")?;
        rows.push(decode_embedding(value.value())?);
    }
    check_count(rows.len(), count, "embeddings")?;
    Ok(rows)
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes =
        Vec::with_capacity(HEADER_SIZE + std::mem::size_of_val(embedding));
    bytes.extend_from_slice(&(embedding.len() as u32).to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(embedding));
    bytes
}

fn decode_embedding(bytes: &[u8]) -> Result<Embedding> {
    let Some((header, data)) = bytes.split_first_chunk::<HEADER_SIZE>() else {
        return Err(Error::CorruptStore("embedding entry too short".into()));
    };
    let dimension = u32::from_le_bytes(*header) as usize;
    if data.len() != dimension * 4 {
        return Err(Error::CorruptStore(format!(
            "embedding entry holds {} bytes for dimension {dimension}",
            data.len()
        )));
    }

    // Stored bytes carry no alignment guarantee, so read each value
    // unaligned rather than casting the slice.
    Ok(data
        .chunks_exact(4)
        .map(bytemuck::pod_read_unaligned::<f32>)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::EmbedderConfig, embedding::EmbeddingStrategy};

    fn sample() -> StoredIndex {
        let config = EmbedderConfig {
            vector_size: 3,
            ..EmbedderConfig::default()
        };
        StoredIndex {
            documents: vec![
                Document::new("출석은 어떻게 하나요?", "QR로 체크합니다."),
                Document::new("휴게실은 어디인가요?", ""),
            ],
            tokenized_corpus: vec![
                vec!["출석은".into(), "어떻게".into(), "하나요".into()],
                vec!["휴게실은".into(), "어디인가요".into()],
            ],
            embeddings: vec![vec![0.6, 0.8, 0.0], vec![]],
            embedder: EmbedderSnapshot {
                config,
                strategy: EmbeddingStrategy::Hashing,
                vectorizer: None,
            },
        }
    }

    #[test]
    fn write_then_read() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vector_store.redb");

        write(&path, &sample()).unwrap();
        assert_eq!(read(&path).unwrap(), Some(sample()));
    }

    #[test]
    fn missing_file_reads_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(read(&tmp.path().join("nope.redb")).unwrap(), None);
    }

    #[test]
    fn rewrite_replaces_previous_contents() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vector_store.redb");
        write(&path, &sample()).unwrap();

        let mut smaller = sample();
        smaller.documents.truncate(1);
        smaller.tokenized_corpus.truncate(1);
        smaller.embeddings.truncate(1);
        write(&path, &smaller).unwrap();

        assert_eq!(read(&path).unwrap().unwrap().documents.len(), 1);
    }

    #[test]
    fn garbage_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vector_store.redb");
        std::fs::write(&path, b"definitely not a database").unwrap();
        assert!(read(&path).is_err());
    }

    #[test]
    fn write_replaces_damaged_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vector_store.redb");
        std::fs::write(&path, b"left behind by a crashed writer").unwrap();

        write(&path, &sample()).unwrap();
        assert_eq!(read(&path).unwrap(), Some(sample()));
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn stale_temp_file_is_discarded() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vector_store.redb");
        std::fs::write(temp_path(&path), b"half written").unwrap();

        write(&path, &sample()).unwrap();
        assert_eq!(read(&path).unwrap(), Some(sample()));
    }

    #[test]
    fn misaligned_lengths_rejected_on_write() {
        let tmp = tempfile::tempdir().unwrap();
        let mut bad = sample();
        bad.embeddings.pop();
        assert!(write(&tmp.path().join("x.redb"), &bad).is_err());
    }

    #[test]
    fn wrong_dimension_rejected_on_read() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vector_store.redb");
        let mut bad = sample();
        bad.embeddings[0] = vec![1.0, 0.0];
        write(&path, &bad).unwrap();

        assert!(matches!(read(&path), Err(Error::CorruptStore(_))));
    }

    #[test]
    fn truncated_embedding_entry_rejected() {
        assert!(decode_embedding(&[1, 0]).is_err());
        let mut bytes = encode_embedding(&[1.0, 2.0]);
        bytes.pop();
        assert!(decode_embedding(&bytes).is_err());
        assert!(decode_embedding(&encode_embedding(&[])).unwrap().is_empty());
    }
}
