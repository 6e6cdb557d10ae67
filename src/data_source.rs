//! Query term source for search load.
//!
//! Terms are read from a newline-delimited text file, one query per line.
//! Double quotes are stripped so terms can be pasted straight into a
//! `search=` parameter, surrounding whitespace is trimmed and blank lines are
//! skipped. Each query picks a term uniformly at random.
//!
//! # Example file
//! ```text
//! "deep learning"
//! protein folding
//! graph neural networks
//! ```

use rand::seq::SliceRandom;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors that can occur when loading query terms.
#[derive(Error, Debug)]
pub enum QuerySourceError {
    #[error("Failed to read query file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Query file contains no terms")]
    EmptyData,
}

/// Immutable, cheaply cloneable list of query terms.
#[derive(Debug, Clone)]
pub struct QuerySource {
    terms: Arc<Vec<String>>,
}

impl QuerySource {
    /// Load query terms from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, QuerySourceError> {
        let path_ref = path.as_ref();
        info!(path = ?path_ref, "Loading query terms");

        let content = fs::read_to_string(path_ref)?;
        let source = Self::from_string(&content)?;

        info!(
            path = ?path_ref,
            terms = source.len(),
            "Query terms loaded successfully"
        );
        Ok(source)
    }

    /// Parse query terms from raw text (useful for testing).
    pub fn from_string(content: &str) -> Result<Self, QuerySourceError> {
        let terms: Vec<String> = content
            .lines()
            .map(|line| line.replace('"', " ").trim().to_string())
            .filter(|term| !term.is_empty())
            .collect();

        Self::from_terms(terms)
    }

    pub fn from_terms(terms: Vec<String>) -> Result<Self, QuerySourceError> {
        if terms.is_empty() {
            return Err(QuerySourceError::EmptyData);
        }
        Ok(Self {
            terms: Arc::new(terms),
        })
    }

    /// A uniformly random term.
    pub fn random_term(&self) -> &str {
        // Never empty: construction rejects an empty list.
        self.terms
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}
