use crate::data::{Term, TermSet};
use crate::storage::{DAILY_PICK_KEY, KeyValueStore, read_json, write_json};
use chrono::{Local, NaiveDate};
use rand::{Rng, thread_rng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// The persisted `{date, name}` record behind the term of the day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyPick {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub name: String,
}

/// `YYYY-MM-DD`.
pub fn date_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

/// The local calendar day. Only front ends should call this; the picker takes
/// the date as an argument.
pub fn today_local() -> NaiveDate {
    Local::now().date_naive()
}

#[derive(Clone)]
pub struct DailyPicker {
    store: Arc<dyn KeyValueStore>,
}

impl DailyPicker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn current(&self) -> Option<DailyPick> {
        read_json(self.store.as_ref(), DAILY_PICK_KEY)
    }

    pub fn pick<'a>(&self, terms: &'a TermSet, today: NaiveDate) -> Option<&'a Term> {
        self.pick_with_rng(terms, today, &mut thread_rng())
    }

    /// Returns the stored pick while it is still today's, otherwise draws a new
    /// one uniformly and stores it. `None` (and no write) for an empty set.
    pub fn pick_with_rng<'a, R>(
        &self,
        terms: &'a TermSet,
        today: NaiveDate,
        rng: &mut R,
    ) -> Option<&'a Term>
    where
        R: Rng,
    {
        if terms.is_empty() {
            return None;
        }
        let today_key = date_key(today);
        let saved = self
            .current()
            .filter(|saved| saved.date == today_key && !saved.name.is_empty());
        if let Some(saved) = saved {
            if let Some(term) = terms.find(&saved.name) {
                debug!(date = %today_key, name = %term.name, "reusing today's pick");
                return Some(term);
            }
            // The stale record is left as stored.
            warn!(
                date = %today_key,
                name = %saved.name,
                "today's pick is missing from the term list, showing the first term"
            );
            return terms.first();
        }

        let chosen = &terms.terms()[rng.gen_range(0..terms.len())];
        debug!(date = %today_key, name = %chosen.name, "drew a new daily pick");
        write_json(
            self.store.as_ref(),
            DAILY_PICK_KEY,
            &DailyPick {
                date: today_key,
                name: chosen.name.clone(),
            },
        );
        Some(chosen)
    }
}
