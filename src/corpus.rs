use std::path::Path;

use tracing::{debug, warn};

use crate::{
    document::Document,
    error::{Error, Result},
};

const QUESTION_COLUMNS: &[&str] = &["question", "q"];
const ANSWER_COLUMNS: &[&str] = &["answer", "a"];

/// Load a question/answer corpus from a delimited text file.
///
/// Files ending in `.tsv` are tab-separated; anything else is read as
/// comma-separated.
pub fn load_corpus(path: &Path) -> Result<Vec<Document>> {
    let text = std::fs::read_to_string(path)?;
    let delimiter = if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("tsv"))
    {
        '\t'
    } else {
        ','
    };

    let documents = parse_corpus(&text, delimiter)?;
    debug!(
        path = %path.display(),
        documents = documents.len(),
        "loaded corpus"
    );
    Ok(documents)
}

/// Parse delimited corpus text with a header row.
///
/// Columns are found by header name, case-insensitively: `question` or `q`,
/// and `answer` or `a`. Fields may be wrapped in double quotes to contain
/// the delimiter or line breaks; `""` inside a quoted field is a literal
/// quote. Rows with an empty question are skipped and a missing answer cell
/// reads as empty.
///
/// # Examples
///
/// ```
/// use faqmatch::corpus::parse_corpus;
///
/// let docs = parse_corpus("Q,A\n\"Hours, please?\",9 to 6\n", ',').unwrap();
/// assert_eq!(docs[0].question, "Hours, please?");
/// assert_eq!(docs[0].answer, "9 to 6");
/// ```
pub fn parse_corpus(text: &str, delimiter: char) -> Result<Vec<Document>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = split_records(text, delimiter).into_iter();

    let header = records
        .next()
        .ok_or_else(|| Error::Corpus("corpus has no header row".into()))?;
    let question_col = find_column(&header, QUESTION_COLUMNS)?;
    let answer_col = find_column(&header, ANSWER_COLUMNS)?;

    let mut documents = Vec::new();
    for (i, record) in records.enumerate() {
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let question = field(&record, question_col);
        if question.is_empty() {
            // +2: 1-based, after the header
            warn!(row = i + 2, "skipping row without a question");
            continue;
        }
        documents.push(Document::new(question, field(&record, answer_col)));
    }

    Ok(documents)
}

fn field(record: &[String], column: usize) -> &str {
    record.get(column).map_or("", |f| f.trim())
}

fn find_column(header: &[String], names: &[&str]) -> Result<usize> {
    header
        .iter()
        .position(|h| {
            let h = h.trim().to_lowercase();
            names.iter().any(|name| h == *name)
        })
        .ok_or_else(|| {
            Error::Corpus(format!(
                "missing column {} in header [{}]",
                names.join("/"),
                header.join(", ")
            ))
        })
}

/// Split text into records of fields, honoring double quotes.
fn split_records(text: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;

    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => {
                record.push(std::mem::take(&mut field));
            }
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\n' if !in_quotes => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            c => field.push(c),
        }
    }

    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}
