mod daily;
mod data;
mod history;
mod search;
mod storage;

#[cfg(feature = "web")]
pub mod web;

pub use daily::{DailyPick, DailyPicker, date_key, today_local};
pub use data::{LoadError, LoadStatus, Term, TermSet, TermStore, TermsUnavailable};
pub use history::{HistoryCache, MAX_HISTORY_ENTRIES};
pub use search::{AnnotatedTerm, Highlighted, SearchFilter, SearchQuery, Segment, fold_case};
pub use storage::{
    DAILY_PICK_KEY, HISTORY_KEY, JsonFileStore, KeyValueStore, MemoryStore, StorageError,
    read_json, write_json,
};
