use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// A single glossary entry. Only `name` is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
}

impl Term {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: None,
            definition: None,
            example: None,
            formula: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.example = Some(example.into());
        self
    }

    pub fn with_formula(mut self, formula: impl Into<String>) -> Self {
        self.formula = Some(formula.into());
        self
    }

    /// The category, with empty strings treated as absent.
    pub fn category(&self) -> Option<&str> {
        self.category.as_deref().filter(|c| !c.is_empty())
    }
}

/// Terms in load order together with their derived category set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermSet {
    terms: Vec<Term>,
    categories: Vec<String>,
}

impl TermSet {
    pub fn from_terms(terms: Vec<Term>) -> Self {
        let categories = terms
            .iter()
            .filter_map(Term::category)
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Self { terms, categories }
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    /// Distinct non-empty categories, ascending.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn first(&self) -> Option<&Term> {
        self.terms.first()
    }

    /// Exact-name lookup; the first record wins when names repeat.
    pub fn find(&self, name: &str) -> Option<&Term> {
        self.terms.iter().find(|term| term.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Term> {
        self.terms.iter()
    }

    pub fn from_json_str(input: &str) -> Result<Self, LoadError> {
        let file: TermFile = serde_json::from_str(input)?;
        Ok(Self::from_terms(file.into_terms()))
    }

    pub fn from_path(path: &Path) -> Result<Self, LoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }
}

impl<'a> IntoIterator for &'a TermSet {
    type Item = &'a Term;
    type IntoIter = std::slice::Iter<'a, Term>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Accepted on-disk shapes: a bare array or an object wrapping one.
#[derive(Deserialize)]
#[serde(untagged)]
enum TermFile {
    Bare(Vec<Term>),
    Wrapped { terms: Vec<Term> },
}

impl TermFile {
    fn into_terms(self) -> Vec<Term> {
        match self {
            TermFile::Bare(terms) | TermFile::Wrapped { terms } => terms,
        }
    }
}

#[derive(Debug)]
pub enum LoadError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(err) => write!(f, "term file io error: {err}"),
            LoadError::Parse(err) => write!(f, "term file parse error: {err}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<std::io::Error> for LoadError {
    fn from(value: std::io::Error) -> Self {
        LoadError::Io(value)
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(value: serde_json::Error) -> Self {
        LoadError::Parse(value)
    }
}

/// Returned when the terms have not been loaded, or failed to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermsUnavailable {
    pub reason: String,
}

impl fmt::Display for TermsUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "terms unavailable: {}", self.reason)
    }
}

impl std::error::Error for TermsUnavailable {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Pending,
    Unavailable,
    Loaded,
}

#[derive(Debug, Clone, Default)]
enum LoadState {
    #[default]
    Pending,
    Unavailable(String),
    Loaded(TermSet),
}

/// Owns the current term set. Starts out pending until a load succeeds or fails.
#[derive(Debug, Clone, Default)]
pub struct TermStore {
    state: LoadState,
}

impl TermStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded(terms: Vec<Term>) -> Self {
        let mut store = Self::new();
        store.replace(terms);
        store
    }

    /// Swaps in a new term set wholesale.
    pub fn replace(&mut self, terms: Vec<Term>) {
        self.replace_set(TermSet::from_terms(terms));
    }

    pub fn replace_set(&mut self, set: TermSet) {
        self.state = LoadState::Loaded(set);
    }

    pub fn mark_unavailable(&mut self, reason: impl Into<String>) {
        self.state = LoadState::Unavailable(reason.into());
    }

    /// Loads a JSON term file. Failures leave the store unavailable rather than
    /// keeping a stale set around.
    pub fn load_path(&mut self, path: &Path) -> Result<usize, LoadError> {
        match TermSet::from_path(path) {
            Ok(set) => {
                let count = set.len();
                info!(path = %path.display(), count, "Loaded terms");
                self.state = LoadState::Loaded(set);
                Ok(count)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to load terms");
                self.state = LoadState::Unavailable(err.to_string());
                Err(err)
            }
        }
    }

    pub fn status(&self) -> LoadStatus {
        match self.state {
            LoadState::Pending => LoadStatus::Pending,
            LoadState::Unavailable(_) => LoadStatus::Unavailable,
            LoadState::Loaded(_) => LoadStatus::Loaded,
        }
    }

    pub fn terms(&self) -> Result<&TermSet, TermsUnavailable> {
        match &self.state {
            LoadState::Loaded(set) => Ok(set),
            LoadState::Pending => Err(TermsUnavailable {
                reason: "terms have not been loaded yet".to_string(),
            }),
            LoadState::Unavailable(reason) => Err(TermsUnavailable {
                reason: reason.clone(),
            }),
        }
    }
}
