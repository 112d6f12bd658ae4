use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use atty::Stream;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::json;
use termgloss_rs::{
    AnnotatedTerm, DailyPicker, Highlighted, HistoryCache, JsonFileStore, KeyValueStore,
    SearchFilter, SearchQuery, Term, TermSet, TermStore, date_key, today_local,
};
use termimad::{FmtText, MadSkin, terminal_size};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "termgloss", about = "Browse a glossary of terms", version)]
pub struct Cli {
    /// JSON file holding the term list.
    #[arg(long, global = true, env = "TERMGLOSS_TERMS", default_value = "terms.json")]
    terms: PathBuf,

    /// File where search history and the term of the day are kept.
    #[arg(
        long,
        global = true,
        env = "TERMGLOSS_STATE",
        default_value = ".termgloss/state.json"
    )]
    state: PathBuf,

    /// Emit JSON instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Filter terms by text and category.
    Search {
        /// Text to look for in names, definitions and examples.
        query: Option<String>,
        /// Only show terms in this category.
        #[arg(short, long, default_value = "")]
        category: String,
        /// Do not add the query to the search history.
        #[arg(long)]
        no_history: bool,
    },
    /// List the categories present in the term list.
    Categories,
    /// Show a single term by exact name.
    Show {
        /// Term name.
        name: String,
    },
    /// Show recent searches containing the given text.
    History {
        /// Text to filter recent searches by.
        prefix: Option<String>,
        /// Forget all recent searches.
        #[arg(long)]
        clear: bool,
    },
    /// Show the term of the day.
    Today {
        /// Day to pick for, as YYYY-MM-DD. Defaults to the local date.
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Serve the glossary over HTTP.
    #[cfg(feature = "web")]
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: std::net::SocketAddr,
        /// Public base URL used in generated links.
        #[arg(long)]
        base_url: Option<String>,
    },
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.command);
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&cli.state));
    match cli.command {
        Command::Search {
            query,
            category,
            no_history,
        } => {
            let terms = load_terms(&cli.terms)?;
            let history = (!no_history).then(|| HistoryCache::new(store));
            handle_search(&terms, query.unwrap_or_default(), category, history, cli.json)
        }
        Command::Categories => handle_categories(&load_terms(&cli.terms)?, cli.json),
        Command::Show { name } => handle_show(&load_terms(&cli.terms)?, &name, cli.json),
        Command::History { prefix, clear } => {
            handle_history(&HistoryCache::new(store), prefix, clear, cli.json)
        }
        Command::Today { date } => {
            let terms = load_terms(&cli.terms)?;
            handle_today(&terms, &DailyPicker::new(store), date, cli.json)
        }
        #[cfg(feature = "web")]
        Command::Serve { addr, base_url } => {
            let config = termgloss_rs::web::WebConfig {
                addr,
                base_url: base_url.unwrap_or_else(|| format!("http://{addr}")),
                terms_path: cli.terms,
                state_path: cli.state,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(termgloss_rs::web::serve(config))?;
            Ok(())
        }
    }
}

fn init_tracing(command: &Command) {
    let default_directive = match command {
        #[cfg(feature = "web")]
        Command::Serve { .. } => "termgloss_rs=info,tower_http=info",
        _ => "termgloss_rs=warn",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_terms(path: &Path) -> Result<TermSet, Box<dyn Error>> {
    let mut store = TermStore::new();
    store
        .load_path(path)
        .map_err(|err| format!("Couldn't load terms from {}: {err}", path.display()))?;
    Ok(store.terms()?.clone())
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|err| format!("expected YYYY-MM-DD ({err})"))
}

fn handle_search(
    terms: &TermSet,
    query: String,
    category: String,
    history: Option<HistoryCache>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    if let Some(history) = &history {
        history.record(&query);
    }
    let search = SearchQuery::new(query, category);
    let results = SearchFilter::filter(terms, &search);

    if as_json {
        let payload = json!({
            "query": search.text(),
            "category": search.category(),
            "count": results.len(),
            "results": results,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else if results.is_empty() {
        println!("No terms found.");
    } else {
        for (idx, result) in results.iter().enumerate() {
            if idx > 0 {
                println!();
            }
            print_card(result);
        }
    }
    Ok(())
}

fn handle_categories(terms: &TermSet, as_json: bool) -> Result<(), Box<dyn Error>> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(terms.categories())?);
        return Ok(());
    }
    if terms.categories().is_empty() {
        println!("No categories.");
        return Ok(());
    }
    let width = terms
        .categories()
        .iter()
        .map(|c| c.chars().count())
        .max()
        .unwrap_or(0)
        .max("CATEGORY".len());
    println!("{:<width$}  {}", "CATEGORY", "TERMS", width = width);
    println!("{:-<width$}  {}", "", "-----", width = width);
    for category in terms.categories() {
        let count = terms
            .iter()
            .filter(|term| term.category() == Some(category.as_str()))
            .count();
        println!("{:<width$}  {}", category, count, width = width);
    }
    Ok(())
}

fn handle_show(terms: &TermSet, name: &str, as_json: bool) -> Result<(), Box<dyn Error>> {
    let term = terms
        .find(name)
        .ok_or_else(|| format!("No term named {name:?}"))?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(term)?);
    } else {
        print_card(&SearchFilter::annotate(term, &SearchQuery::default()));
    }
    Ok(())
}

fn handle_history(
    history: &HistoryCache,
    prefix: Option<String>,
    clear: bool,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    if clear {
        history.clear();
        if !as_json {
            println!("Search history cleared.");
        }
        return Ok(());
    }
    let prefix = prefix.unwrap_or_default();
    let suggestions = history.suggestions(prefix.trim());
    if as_json {
        println!("{}", serde_json::to_string_pretty(&suggestions)?);
    } else if suggestions.is_empty() {
        println!("No recent searches.");
    } else {
        for entry in suggestions {
            println!("{entry}");
        }
    }
    Ok(())
}

fn handle_today(
    terms: &TermSet,
    picker: &DailyPicker,
    date: Option<NaiveDate>,
    as_json: bool,
) -> Result<(), Box<dyn Error>> {
    let today = date.unwrap_or_else(today_local);
    let pick = picker.pick(terms, today);
    if as_json {
        let payload = json!({ "date": date_key(today), "term": pick });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }
    match pick {
        Some(term) => print_term_of_the_day(term, today),
        None => println!("No term of the day: the term list is empty."),
    }
    Ok(())
}

fn print_card(result: &AnnotatedTerm<'_>) {
    let term = result.term;
    if stdout_is_tty() {
        let mut md = format!("## {}\n", mark(&result.name));
        md.push_str(&format!(
            "**Category:** {}\n\n",
            term.category().unwrap_or("—")
        ));
        md.push_str(&format!(
            "**Definition:** {}\n\n",
            result.definition.as_ref().map(mark).unwrap_or_else(|| "—".to_string())
        ));
        if let Some(example) = &result.example {
            md.push_str(&format!("**Example:** {}\n\n", mark(example)));
        }
        if let Some(formula) = &term.formula {
            md.push_str(&format!("**Formula:** {formula}\n"));
        }
        render_markdown(&md);
    } else {
        print!("{}", plain_card(result));
    }
}

// Matches are bracketed so they survive piping.
fn plain_card(result: &AnnotatedTerm<'_>) -> String {
    let term = result.term;
    let bracket = |text: &Highlighted| text.render("[", "]");
    let mut out = format!("{}\n", bracket(&result.name));
    out.push_str(&format!(
        "  Category:   {}\n",
        term.category().unwrap_or("—")
    ));
    out.push_str(&format!(
        "  Definition: {}\n",
        result.definition.as_ref().map(bracket).unwrap_or_else(|| "—".to_string())
    ));
    if let Some(example) = &result.example {
        out.push_str(&format!("  Example:    {}\n", bracket(example)));
    }
    if let Some(formula) = &term.formula {
        out.push_str(&format!("  Formula:    {formula}\n"));
    }
    out
}

fn print_term_of_the_day(term: &Term, today: NaiveDate) {
    let key = date_key(today);
    if stdout_is_tty() {
        let mut md = format!("### Term of the day ({key})\n**{}**\n\n", term.name);
        if let Some(definition) = &term.definition {
            md.push_str(&format!("{definition}\n\n"));
        }
        if let Some(example) = &term.example {
            md.push_str(&format!("*Example:* {example}\n"));
        }
        render_markdown(&md);
    } else {
        println!("Term of the day ({key}): {}", term.name);
        if let Some(definition) = &term.definition {
            println!("  {definition}");
        }
        if let Some(example) = &term.example {
            println!("  Example: {example}");
        }
    }
}

// Inline code is the closest thing termimad has to a highlighter pen.
fn mark(text: &Highlighted) -> String {
    text.render("`", "`")
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn render_markdown(body: &str) {
    let skin = MadSkin::default();
    let formatted = FmtText::from(&skin, body.trim(), Some(markdown_width()));
    println!("{formatted}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_card_brackets_matches() {
        let term = Term::new("GDP")
            .with_category("Macro")
            .with_definition("Gross Domestic Product")
            .with_example("GDP grew 2%");
        let card = plain_card(&SearchFilter::annotate(&term, &SearchQuery::new("gdp", "")));
        assert_eq!(
            card,
            "[GDP]\n  Category:   Macro\n  Definition: Gross Domestic Product\n  Example:    [GDP] grew 2%\n"
        );
    }

    #[test]
    fn plain_card_marks_absent_fields() {
        let term = Term::new("Orphan");
        let card = plain_card(&SearchFilter::annotate(&term, &SearchQuery::default()));
        assert_eq!(card, "Orphan\n  Category:   —\n  Definition: —\n");
    }
}
