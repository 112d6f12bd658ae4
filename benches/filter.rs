use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use termgloss_rs::{SearchFilter, SearchQuery, Term, TermSet};

const CATEGORIES: &[&str] = &["Macro", "Finance", "Statistics", "Accounting"];

fn synthetic_terms(count: usize) -> TermSet {
    let terms = (0..count)
        .map(|idx| {
            Term::new(format!("Term {idx}"))
                .with_category(CATEGORIES[idx % CATEGORIES.len()])
                .with_definition(format!(
                    "Definition number {idx} covering Gross Domestic Product and price levels"
                ))
                .with_example(format!("Example {idx}: ÉTÉ inflation (y/y) rose 3.2%"))
        })
        .collect();
    TermSet::from_terms(terms)
}

fn bench_filter(c: &mut Criterion) {
    let terms = synthetic_terms(2_000);
    const CASES: &[(&str, &str)] = &[
        ("", ""),
        ("", "Macro"),
        ("gdp", ""),
        ("domestic", "Finance"),
        ("(y/y)", ""),
        ("été", ""),
    ];
    for &(text, category) in CASES {
        let label = format!("{text:?}_{category}");
        let query = SearchQuery::new(text, category);
        c.bench_with_input(BenchmarkId::new("filter", label), &query, |b, query| {
            b.iter(|| {
                let results = SearchFilter::filter(&terms, query);
                black_box(results.len());
            });
        });
    }
}

fn bench_highlight(c: &mut Criterion) {
    let text = "Inflation measures how fast inflation erodes purchasing power. ".repeat(32);
    c.bench_function("highlight::repeated_matches", |b| {
        b.iter(|| {
            let highlighted = SearchFilter::highlight(black_box(&text), "inflation");
            black_box(highlighted.segments().len());
        });
    });
}

criterion_group!(benches, bench_filter, bench_highlight);
criterion_main!(benches);
