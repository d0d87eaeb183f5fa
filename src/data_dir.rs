use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

pub const DATA_DIR_ENV_VAR: &str = "FAQMATCH_DATA_DIR";

/// File name of the persisted index inside the vector store directory.
pub const VECTOR_STORE_FILE: &str = "vector_store.redb";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The FAQMATCH_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/faqmatch/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV_VAR) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("faqmatch")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Optional JSON configuration file.
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Directory holding the persisted index. Not created here; the index
    /// creates it on save.
    pub fn vector_store_dir(&self) -> PathBuf {
        self.root.join("vector_store")
    }

    pub fn vector_store_file(&self) -> PathBuf {
        self.vector_store_dir().join(VECTOR_STORE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_with_explicit_path() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        assert_eq!(dir.root(), tmp.path());
        assert_eq!(dir.config_file(), tmp.path().join("config.json"));
        assert_eq!(
            dir.vector_store_file(),
            tmp.path().join("vector_store").join("vector_store.redb")
        );
    }

    #[test]
    fn resolve_creates_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a").join("b");
        let dir = DataDir::resolve(Some(&nested)).unwrap();

        assert!(dir.root().is_dir());
        assert!(!dir.vector_store_dir().exists());
    }
}
