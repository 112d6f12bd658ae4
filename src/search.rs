//! Term filtering and match highlighting.
//!
//! Matching is plain substring containment over case-folded text. Queries are
//! never interpreted as patterns, so `C++` or `a.b` only ever match themselves.

use crate::data::{Term, TermSet, TermStore, TermsUnavailable};
use serde::Serialize;

/// Folds text for case-insensitive comparison, one character at a time.
pub fn fold_case(text: &str) -> String {
    text.chars().flat_map(fold_char).collect()
}

// Final sigma folds to the medial form, so `ΟΔΟΣ` and `οδος` agree. Both are
// two bytes in UTF-8, which keeps folded offsets aligned with `FoldedText`.
fn fold_char(ch: char) -> impl Iterator<Item = char> {
    ch.to_lowercase()
        .map(|lower| if lower == 'ς' { 'σ' } else { lower })
}

/// Free-text query plus an optional exact category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    text: String,
    folded: String,
    category: Option<String>,
}

impl SearchQuery {
    /// An empty `category` means every category.
    pub fn new(text: impl Into<String>, category: impl Into<String>) -> Self {
        let text = text.into();
        let category = category.into();
        Self {
            folded: fold_case(&text),
            text,
            category: (!category.is_empty()).then_some(category),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub text: String,
    pub matched: bool,
}

/// Text split into runs, with query occurrences flagged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Highlighted {
    segments: Vec<Segment>,
}

impl Highlighted {
    pub fn plain(text: &str) -> Self {
        let mut out = Self::default();
        out.push(text, false);
        out
    }

    fn push(&mut self, text: &str, matched: bool) {
        if text.is_empty() {
            return;
        }
        self.segments.push(Segment {
            text: text.to_string(),
            matched,
        });
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn has_matches(&self) -> bool {
        self.segments.iter().any(|segment| segment.matched)
    }

    /// Original text with no markers.
    pub fn text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    /// Wraps every matched run in `open`/`close`. Text is emitted verbatim.
    pub fn render(&self, open: &str, close: &str) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            if segment.matched {
                out.push_str(open);
                out.push_str(&segment.text);
                out.push_str(close);
            } else {
                out.push_str(&segment.text);
            }
        }
        out
    }

    /// HTML-escaped text with matches wrapped in `<mark>`.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            let escaped = html_escape(&segment.text);
            if segment.matched {
                out.push_str("<mark>");
                out.push_str(&escaped);
                out.push_str("</mark>");
            } else {
                out.push_str(&escaped);
            }
        }
        out
    }
}

/// A matching term with its searchable fields highlighted.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedTerm<'a> {
    pub term: &'a Term,
    pub name: Highlighted,
    pub definition: Option<Highlighted>,
    pub example: Option<Highlighted>,
}

pub struct SearchFilter;

impl SearchFilter {
    /// Terms passing both the category and text predicates, in load order.
    pub fn filter<'a>(terms: &'a TermSet, query: &SearchQuery) -> Vec<AnnotatedTerm<'a>> {
        terms
            .iter()
            .filter(|term| Self::matches(term, query))
            .map(|term| Self::annotate(term, query))
            .collect()
    }

    pub fn matches(term: &Term, query: &SearchQuery) -> bool {
        let category_ok = match query.category() {
            None => true,
            Some(category) => term.category.as_deref() == Some(category),
        };
        if !category_ok {
            return false;
        }
        let needle = query.folded.as_str();
        fold_case(&term.name).contains(needle)
            || fold_case(term.definition.as_deref().unwrap_or_default()).contains(needle)
            || fold_case(term.example.as_deref().unwrap_or_default()).contains(needle)
    }

    pub fn annotate<'a>(term: &'a Term, query: &SearchQuery) -> AnnotatedTerm<'a> {
        AnnotatedTerm {
            term,
            name: Self::highlight(&term.name, query.text()),
            definition: term
                .definition
                .as_deref()
                .map(|text| Self::highlight(text, query.text())),
            example: term
                .example
                .as_deref()
                .map(|text| Self::highlight(text, query.text())),
        }
    }

    /// Flags every case-insensitive occurrence of `query` in `text`, scanning
    /// left to right without overlaps. An empty query flags nothing.
    pub fn highlight(text: &str, query: &str) -> Highlighted {
        let needle = fold_case(query);
        if needle.is_empty() {
            return Highlighted::plain(text);
        }
        let folded = FoldedText::new(text);
        let mut out = Highlighted::default();
        let mut cursor = 0usize;
        for (start, hit) in folded.text.match_indices(needle.as_str()) {
            let (from, to) = folded.original_span(text, start, hit.len());
            if from < cursor {
                continue;
            }
            out.push(&text[cursor..from], false);
            out.push(&text[from..to], true);
            cursor = to;
        }
        out.push(&text[cursor..], false);
        out
    }
}

/// Folded copy of a string that remembers which original character each
/// folded byte came from.
struct FoldedText {
    text: String,
    origin: Vec<usize>,
}

impl FoldedText {
    fn new(source: &str) -> Self {
        let mut text = String::with_capacity(source.len());
        let mut origin = Vec::with_capacity(source.len());
        for (offset, ch) in source.char_indices() {
            for lower in fold_char(ch) {
                text.push(lower);
                origin.extend(std::iter::repeat_n(offset, lower.len_utf8()));
            }
        }
        Self { text, origin }
    }

    /// Maps a folded byte span onto whole characters of `source`.
    fn original_span(&self, source: &str, start: usize, len: usize) -> (usize, usize) {
        let from = self.origin[start];
        let last = self.origin[start + len - 1];
        let width = source[last..].chars().next().map_or(0, char::len_utf8);
        (from, last + width)
    }
}

fn html_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

impl TermStore {
    /// Filters the loaded set. Errors only when nothing has been loaded.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<AnnotatedTerm<'_>>, TermsUnavailable> {
        Ok(SearchFilter::filter(self.terms()?, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn macro_terms() -> TermSet {
        TermSet::from_terms(vec![
            Term::new("GDP")
                .with_category("Macro")
                .with_definition("Gross Domestic Product"),
            Term::new("Inflation")
                .with_category("Macro")
                .with_definition("Price rise"),
            Term::new("Beta")
                .with_category("Finance")
                .with_definition("Sensitivity to the market")
                .with_example("A beta of 1.2 swings harder than gdp news"),
        ])
    }

    fn names(results: &[AnnotatedTerm<'_>]) -> Vec<String> {
        results.iter().map(|r| r.term.name.clone()).collect()
    }

    #[test]
    fn query_matches_name_definition_or_example() {
        let terms = macro_terms();
        let results = SearchFilter::filter(&terms, &SearchQuery::new("gdp", ""));
        assert_eq!(names(&results), ["GDP", "Beta"]);
        let results = SearchFilter::filter(&terms, &SearchQuery::new("PRICE", ""));
        assert_eq!(names(&results), ["Inflation"]);
    }

    #[test]
    fn category_and_text_are_both_required() {
        let terms = macro_terms();
        let results = SearchFilter::filter(&terms, &SearchQuery::new("gdp", "Macro"));
        assert_eq!(names(&results), ["GDP"]);
        let results = SearchFilter::filter(&terms, &SearchQuery::new("", "Macro"));
        assert_eq!(names(&results), ["GDP", "Inflation"]);
        let results = SearchFilter::filter(&terms, &SearchQuery::new("", "macro"));
        assert!(results.is_empty());
    }

    #[test]
    fn highlights_name_case_insensitively() {
        let terms = macro_terms();
        let results = SearchFilter::filter(&terms, &SearchQuery::new("gdp", ""));
        assert_eq!(results[0].name.render("<mark>", "</mark>"), "<mark>GDP</mark>");
        let example = results[1].example.as_ref().unwrap();
        assert_eq!(
            example.render("[", "]"),
            "A beta of 1.2 swings harder than [gdp] news"
        );
    }

    #[test]
    fn pattern_characters_are_literal() {
        let terms = TermSet::from_terms(vec![
            Term::new("C++"),
            Term::new("axb"),
            Term::new("a.b"),
            Term::new("f(x)"),
        ]);
        assert_eq!(
            names(&SearchFilter::filter(&terms, &SearchQuery::new("C++", ""))),
            ["C++"]
        );
        assert_eq!(
            names(&SearchFilter::filter(&terms, &SearchQuery::new("a.b", ""))),
            ["a.b"]
        );
        assert_eq!(
            names(&SearchFilter::filter(&terms, &SearchQuery::new("(x)", ""))),
            ["f(x)"]
        );
        assert_eq!(
            SearchFilter::highlight("f(x) = (x)", "(x)").render("<", ">"),
            "f<(x)> = <(x)>"
        );
        assert!(!SearchFilter::highlight("axb", "a.b").has_matches());
    }

    #[test]
    fn highlight_is_left_to_right_without_overlap() {
        assert_eq!(SearchFilter::highlight("aaaa", "aa").render("[", "]"), "[aa][aa]");
        assert_eq!(SearchFilter::highlight("aaa", "aa").render("[", "]"), "[aa]a");
    }

    #[test]
    fn highlight_keeps_original_case_and_multibyte_text() {
        let out = SearchFilter::highlight("Über ÜBER über", "über");
        assert_eq!(out.render("[", "]"), "[Über] [ÜBER] [über]");
        let out = SearchFilter::highlight("İstanbul", "i");
        assert_eq!(out.text(), "İstanbul");
    }

    #[test]
    fn final_sigma_matches_capital_sigma() {
        assert_eq!(fold_case("ΟΔΟΣ"), fold_case("οδος"));
        let set = TermSet::from_terms(vec![Term::new("ΟΔΟΣ").with_definition("κεντρικός δρόμος")]);
        assert_eq!(names(&SearchFilter::filter(&set, &SearchQuery::new("οδος", ""))), ["ΟΔΟΣ"]);
        assert_eq!(
            SearchFilter::highlight("Η ΟΔΟΣ, η οδος", "οδος").render("[", "]"),
            "Η [ΟΔΟΣ], η [οδος]"
        );
    }

    #[test]
    fn empty_query_highlights_nothing() {
        let out = SearchFilter::highlight("Gross Domestic Product", "");
        assert!(!out.has_matches());
        assert_eq!(out.text(), "Gross Domestic Product");
    }

    #[test]
    fn html_output_escapes_text() {
        let out = SearchFilter::highlight("<b>R&D</b>", "r&d");
        assert_eq!(out.to_html(), "&lt;b&gt;<mark>R&amp;D</mark>&lt;/b&gt;");
    }

    #[test]
    fn absent_fields_stay_absent() {
        let terms = TermSet::from_terms(vec![Term::new("Solo")]);
        let results = SearchFilter::filter(&terms, &SearchQuery::new("so", ""));
        assert!(results[0].definition.is_none());
        assert!(results[0].example.is_none());
    }

    #[test]
    fn store_search_distinguishes_unloaded_from_empty() {
        let store = TermStore::new();
        assert!(store.search(&SearchQuery::new("x", "")).is_err());
        let store = TermStore::loaded(vec![Term::new("GDP")]);
        assert!(store.search(&SearchQuery::new("zzz", "")).unwrap().is_empty());
    }

    fn term_strategy() -> impl Strategy<Value = Term> {
        (
            "[a-cA-C+.() ]{1,6}",
            prop::option::of(prop_oneof![Just("Macro"), Just("Micro"), Just("")]),
            prop::option::of("[a-cA-C+.() ]{0,8}"),
            prop::option::of("[a-cA-C+.() ]{0,8}"),
        )
            .prop_map(|(name, category, definition, example)| Term {
                name,
                category: category.map(str::to_string),
                definition,
                example,
                formula: None,
            })
    }

    fn reference_match(term: &Term, query: &str, category: &str) -> bool {
        let query = query.to_lowercase();
        let category_ok = category.is_empty() || term.category.as_deref() == Some(category);
        category_ok
            && (term.name.to_lowercase().contains(&query)
                || term.definition.clone().unwrap_or_default().to_lowercase().contains(&query)
                || term.example.clone().unwrap_or_default().to_lowercase().contains(&query))
    }

    proptest! {
        #[test]
        fn filter_is_sound_complete_and_stable(
            terms in prop::collection::vec(term_strategy(), 0..12),
            query in "[a-cA-C+.() ]{0,3}",
            category in prop_oneof![Just(""), Just("Macro"), Just("Micro")],
        ) {
            let set = TermSet::from_terms(terms);
            let got: Vec<&Term> = SearchFilter::filter(&set, &SearchQuery::new(query.clone(), category))
                .into_iter()
                .map(|r| r.term)
                .collect();
            let expected: Vec<&Term> = set
                .iter()
                .filter(|t| reference_match(t, &query, category))
                .collect();
            prop_assert_eq!(got, expected);
        }

        #[test]
        fn empty_query_is_a_pure_category_filter(
            terms in prop::collection::vec(term_strategy(), 0..12),
            category in prop_oneof![Just(""), Just("Macro"), Just("Micro")],
        ) {
            let set = TermSet::from_terms(terms);
            let got = SearchFilter::filter(&set, &SearchQuery::new("", category));
            let expected: Vec<&Term> = set
                .iter()
                .filter(|t| category.is_empty() || t.category.as_deref() == Some(category))
                .collect();
            prop_assert_eq!(got.iter().map(|r| r.term).collect::<Vec<_>>(), expected);
        }

        #[test]
        fn highlight_preserves_text_and_marks_only_the_query(
            text in "[a-cA-C+.() ]{0,16}",
            query in "[a-cA-C+.()]{1,3}",
        ) {
            let out = SearchFilter::highlight(&text, &query);
            prop_assert_eq!(out.text(), text);
            for segment in out.segments().iter().filter(|s| s.matched) {
                prop_assert_eq!(fold_case(&segment.text), fold_case(&query));
            }
        }
    }
}
