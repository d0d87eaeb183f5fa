//! Tunable parameters and domain keyword tables.
//!
//! Everything here is plain data with serde defaults, so a partial
//! `config.json` only needs to name the fields it overrides:
//!
//! ```
//! use faqmatch::config::Config;
//!
//! let config: Config =
//!     serde_json::from_str(r#"{"retrieval": {"threshold": 0.5}}"#).unwrap();
//! assert_eq!(config.retrieval.threshold, 0.5);
//! assert_eq!(config.retrieval.top_k, 3);
//! assert_eq!(config.embedder.vector_size, 256);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    data_dir::DataDir,
    embedding::EmbeddingStrategy,
    error::{Error, Result},
    tfidf::{MAX_PROJECTION_WEIGHTS, projection_size},
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub retrieval: RetrievalConfig,
    pub keywords: KeywordConfig,
    pub embedder: EmbedderConfig,
}

impl Config {
    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration for a data directory.
    ///
    /// An explicit path must exist. Otherwise `<data_dir>/config.json` is
    /// used when present, and the built-in defaults when it is not.
    pub fn resolve(explicit: Option<&Path>, data_dir: &DataDir) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let default_path = data_dir.config_file();
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.embedder.validate()?;
        if let Some(c) =
            self.keywords.categories.iter().find(|c| c.name.trim().is_empty())
        {
            return Err(Error::Config(format!(
                "category with keywords {:?} needs a name",
                c.keywords
            )));
        }
        if self.retrieval.overfetch_factor == 0 {
            return Err(Error::Config(
                "retrieval.overfetch_factor must be > 0".into(),
            ));
        }
        if let Some(k) = self.keywords.weighted.iter().find(|k| {
            k.term.trim().is_empty() || !(1..=3).contains(&k.weight)
        }) {
            return Err(Error::Config(format!(
                "weighted keyword {:?} needs a non-empty term and a weight in 1..=3",
                k.term
            )));
        }
        Ok(())
    }
}

/// Scoring weights and cut-offs used by the hybrid retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Results returned when the caller does not pass `top_k`.
    pub top_k: usize,
    /// Minimum combined score when the caller does not pass a threshold.
    pub threshold: f32,
    pub vector_weight: f32,
    pub lexical_weight: f32,
    /// Vector candidates fetched per requested result.
    pub overfetch_factor: usize,
    /// Floor applied by the relevance gate regardless of the threshold.
    pub min_relevance_score: f32,
    /// Match terms the query and document content must share.
    pub min_term_overlap: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            threshold: 0.7,
            vector_weight: 0.9,
            lexical_weight: 0.1,
            overfetch_factor: 3,
            min_relevance_score: 0.6,
            min_term_overlap: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedKeyword {
    pub term: String,
    /// Total number of times an occurrence counts, 1 to 3.
    pub weight: usize,
}

impl WeightedKeyword {
    pub fn new(term: &str, weight: usize) -> Self {
        Self {
            term: term.to_string(),
            weight,
        }
    }
}

/// Domain word lists for query weighting and the relevance filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    pub weighted: Vec<WeightedKeyword>,
    /// Topic keywords a matching answer must share with the query.
    pub core: Vec<String>,
    /// Markers of non-committal answers.
    pub hedges: Vec<String>,
    /// Declarative endings required when the query is a question.
    pub assertive_endings: Vec<String>,
    /// Topic table for labelling entries. Order breaks ties.
    pub categories: Vec<Category>,
}

/// A named topic and the words that suggest it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub keywords: Vec<String>,
}

impl Category {
    pub fn new(name: &str, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            keywords: to_strings(keywords),
        }
    }
}

impl Default for KeywordConfig {
    fn default() -> Self {
        let weighted = [
            // attendance and stipend
            ("출석", 3),
            ("출결", 3),
            ("결석", 3),
            ("지각", 3),
            ("조퇴", 3),
            ("외출", 3),
            ("장려금", 3),
            ("attendance", 3),
            ("stipend", 3),
            // general education
            ("교육", 2),
            ("수업", 2),
            ("강의", 2),
            ("훈련", 2),
            ("커리큘럼", 2),
            ("education", 2),
            // facilities
            ("강의실", 1),
            ("시설", 1),
            ("휴게실", 1),
            ("사물함", 1),
            ("facility", 1),
        ]
        .into_iter()
        .map(|(term, weight)| WeightedKeyword::new(term, weight))
        .collect();

        Self {
            weighted,
            core: to_strings(&[
                "출석",
                "출결",
                "결석",
                "휴가",
                "병가",
                "교육",
                "프로젝트",
                "캠프",
                "학습",
                "attendance",
                "leave",
                "education",
                "project",
                "camp",
                "learning",
            ]),
            hedges: to_strings(&[
                "아마",
                "대략",
                "대충",
                "보통",
                "일반적으로",
                "대체로",
                "대부분",
                "것 같",
                "maybe",
                "approximately",
                "usually",
                "generally",
                "mostly",
                "probably",
                "perhaps",
            ]),
            assertive_endings: to_strings(&[
                "니다", "세요", "어요", "아요", "해요", "에요", "예요", "다.",
            ]),
            categories: default_categories(),
        }
    }
}

fn default_categories() -> Vec<Category> {
    vec![
        Category::new(
            "수업",
            &[
                "수업", "강의", "교육", "커리큘럼", "진도", "프로그램", "진행",
                "출석",
            ],
        ),
        Category::new(
            "과제",
            &[
                "과제", "제출", "마감", "숙제", "평가", "점수", "채점", "합격",
                "불합격",
            ],
        ),
        Category::new(
            "프로젝트",
            &[
                "프로젝트", "팀", "협업", "미팅", "발표", "데모", "시연", "기획",
                "개발", "배포",
            ],
        ),
        Category::new(
            "일정",
            &[
                "일정", "시간", "날짜", "요일", "기간", "주차", "달력", "휴일",
                "휴가", "종료",
            ],
        ),
        Category::new(
            "학습자료",
            &[
                "자료", "교재", "책", "강의록", "문서", "참고", "링크", "사이트",
                "다운", "업로드",
            ],
        ),
        Category::new(
            "시설",
            &[
                "교실", "강의실", "컴퓨터", "장비", "시설", "자리", "좌석", "위치",
                "주소",
            ],
        ),
        Category::new(
            "생활정보",
            &["식사", "점심", "저녁", "카페", "휴게", "기숙사", "교통", "주차"],
        ),
    ]
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Embedding model parameters. Persisted alongside the index so a reloaded
/// index embeds queries in the same space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    pub strategy: EmbeddingStrategy,
    /// Output embedding length.
    pub vector_size: usize,
    /// TF-IDF feature cap, also the projection input width.
    pub max_features: usize,
    pub ngram_min: usize,
    pub ngram_max: usize,
    /// Seed for the projection matrix and the fallback token vectors.
    pub seed: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            strategy: EmbeddingStrategy::Statistical,
            vector_size: 256,
            max_features: 5000,
            ngram_min: 2,
            ngram_max: 3,
            seed: 42,
        }
    }
}

impl EmbedderConfig {
    /// Also checked when an embedder is restored from a saved index.
    pub fn validate(&self) -> Result<()> {
        if self.vector_size == 0 {
            return Err(Error::Config("embedder.vector_size must be > 0".into()));
        }
        if self.max_features == 0 {
            return Err(Error::Config(
                "embedder.max_features must be > 0".into(),
            ));
        }
        if self.ngram_min == 0 || self.ngram_min > self.ngram_max {
            return Err(Error::Config(format!(
                "invalid n-gram range {}..={}",
                self.ngram_min, self.ngram_max
            )));
        }
        projection_size(self.max_features, self.vector_size).map_err(|_| {
            Error::Config(format!(
                "embedder.max_features x embedder.vector_size exceeds \
                 {MAX_PROJECTION_WEIGHTS}"
            ))
        })?;
        Ok(())
    }
}
