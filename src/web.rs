use crate::{
    DailyPicker, HistoryCache, JsonFileStore, KeyValueStore, LoadError, LoadStatus,
    SearchFilter, SearchQuery, Term, TermSet, TermStore, TermsUnavailable, date_key,
    today_local,
};
use askama::Template;
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use parking_lot::RwLock;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::compression::CompressionLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn};

type SharedState = Arc<AppState>;

pub struct AppState {
    pub terms: RwLock<TermStore>,
    pub terms_path: PathBuf,
    pub history: HistoryCache,
    pub daily: DailyPicker,
    pub base_url: String,
}

impl AppState {
    pub fn new(
        terms: TermStore,
        terms_path: PathBuf,
        store: Arc<dyn KeyValueStore>,
        base_url: String,
    ) -> Self {
        Self {
            terms: RwLock::new(terms),
            terms_path,
            history: HistoryCache::new(store.clone()),
            daily: DailyPicker::new(store),
            base_url,
        }
    }
}

#[derive(Clone)]
pub struct WebConfig {
    pub addr: SocketAddr,
    pub base_url: String,
    pub terms_path: PathBuf,
    pub state_path: PathBuf,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            base_url: "http://127.0.0.1:8080".to_string(),
            terms_path: PathBuf::from("terms.json"),
            state_path: PathBuf::from(".termgloss/state.json"),
        }
    }
}

#[derive(Debug)]
pub enum WebError {
    Io(std::io::Error),
}

impl fmt::Display for WebError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for WebError {}

impl From<std::io::Error> for WebError {
    fn from(value: std::io::Error) -> Self {
        WebError::Io(value)
    }
}

pub async fn serve(config: WebConfig) -> Result<(), WebError> {
    let terms = load_term_store(&config.terms_path).await;
    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&config.state_path));
    let state = Arc::new(AppState::new(
        terms,
        config.terms_path.clone(),
        store,
        config.base_url.clone(),
    ));
    let router = build_router(state);
    info!(
        %config.addr,
        base = %config.base_url,
        terms = %config.terms_path.display(),
        state = %config.state_path.display(),
        "Binding HTTP listener"
    );
    let listener = TcpListener::bind(config.addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server exited");
    Ok(())
}

async fn read_terms(path: &Path) -> Result<TermSet, LoadError> {
    let content = tokio::fs::read_to_string(path).await?;
    TermSet::from_json_str(&content)
}

/// Loads the term file. A failure yields an unavailable store rather than an error
/// so the server can still come up and say so.
pub async fn load_term_store(path: &Path) -> TermStore {
    let mut store = TermStore::new();
    match read_terms(path).await {
        Ok(set) => {
            info!(path = %path.display(), count = set.len(), "Loaded terms");
            store.replace_set(set);
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to load terms");
            store.mark_unavailable(err.to_string());
        }
    }
    store
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<TermsUnavailable> for ApiError {
    fn from(value: TermsUnavailable) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: value.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = json!({ "error": self.message });
        (self.status, Json(payload)).into_response()
    }
}

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/api/terms", get(api_terms))
        .route("/api/terms/:name", get(api_term))
        .route("/api/categories", get(api_categories))
        .route("/api/history", get(api_history).post(api_record_history))
        .route("/api/today", get(api_today))
        .route("/api/reload", post(api_reload))
        .route("/healthz", get(health))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CompressionLayer::new())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            let _ = stream.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[derive(Debug, Default, Deserialize)]
struct BrowseParams {
    q: Option<String>,
    category: Option<String>,
}

impl BrowseParams {
    fn query(&self) -> SearchQuery {
        SearchQuery::new(
            self.q.clone().unwrap_or_default(),
            self.category.clone().unwrap_or_default(),
        )
    }
}

#[derive(Debug, Default, Deserialize)]
struct HistoryParams {
    prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordHistoryRequest {
    query: String,
}

async fn health(State(state): State<SharedState>) -> impl IntoResponse {
    let guard = state.terms.read();
    let count = guard.terms().map(TermSet::len).ok();
    Json(json!({
        "status": "ok",
        "service": "termgloss-web",
        "terms": guard.status(),
        "count": count,
    }))
}

/// Runs work that touches the state file off the async workers.
async fn blocking<T, F>(task: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task).await.map_err(|err| {
        warn!(error = %err, "blocking task failed");
        ApiError::internal("internal error")
    })
}

async fn home(
    State(state): State<SharedState>,
    Query(params): Query<BrowseParams>,
) -> Response {
    blocking(move || render_home(&state, &params))
        .await
        .unwrap_or_else(IntoResponse::into_response)
}

fn render_home(state: &AppState, params: &BrowseParams) -> Response {
    let query = params.query();
    let typed = query.text().trim().to_string();
    state.history.record(&typed);

    let guard = state.terms.read();
    let terms = match guard.terms() {
        Ok(terms) => terms,
        Err(err) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Html(render_error_page("Couldn't load terms.", &err.reason)),
            )
                .into_response();
        }
    };

    let results = SearchFilter::filter(terms, &query);
    let cards = results
        .iter()
        .map(|result| TermCard {
            name_html: result.name.to_html(),
            category: result.term.category().unwrap_or("—").to_string(),
            definition_html: result
                .definition
                .as_ref()
                .map(|d| d.to_html())
                .unwrap_or_else(|| "—".to_string()),
            example_html: result
                .example
                .as_ref()
                .map(|e| e.to_html())
                .unwrap_or_default(),
            formula: result.term.formula.clone().unwrap_or_default(),
        })
        .collect();
    let today = today_local();
    let daily = state.daily.pick(terms, today).map(|term| DailyCard {
        date: date_key(today),
        name: term.name.clone(),
        definition: term.definition.clone().unwrap_or_default(),
        example: term.example.clone().unwrap_or_default(),
    });
    let selected = query.category().unwrap_or_default();
    let categories = terms
        .categories()
        .iter()
        .map(|value| CategoryOption {
            value: value.as_str(),
            selected: value == selected,
        })
        .collect();
    let recent = state
        .history
        .suggestions(&typed)
        .into_iter()
        .map(|text| RecentLink {
            href: browse_href(&text, selected),
            text,
        })
        .collect();

    let template = HomeTemplate {
        base_url: &state.base_url,
        query: query.text(),
        category_all_selected: selected.is_empty(),
        categories,
        result_count: results.len(),
        cards,
        has_daily: daily.is_some(),
        daily: daily.unwrap_or_default(),
        recent,
    };
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(render_error_page("Something went wrong", &err.to_string())),
        )
            .into_response(),
    }
}

async fn api_terms(
    State(state): State<SharedState>,
    Query(params): Query<BrowseParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let query = params.query();
    let guard = state.terms.read();
    let results = guard.search(&query)?;
    Ok(Json(json!({
        "query": query.text(),
        "category": query.category(),
        "count": results.len(),
        "results": results,
    })))
}

async fn api_term(
    State(state): State<SharedState>,
    axum::extract::Path(name): axum::extract::Path<String>,
) -> Result<Json<Term>, ApiError> {
    let guard = state.terms.read();
    guard
        .terms()?
        .find(&name)
        .cloned()
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("No term named {name:?}")))
}

async fn api_categories(
    State(state): State<SharedState>,
) -> Result<Json<Vec<String>>, ApiError> {
    let guard = state.terms.read();
    Ok(Json(guard.terms()?.categories().to_vec()))
}

async fn api_history(
    State(state): State<SharedState>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<String>> {
    let prefix = params.prefix.unwrap_or_default();
    Json(state.history.suggestions(prefix.trim()))
}

async fn api_record_history(
    State(state): State<SharedState>,
    Json(request): Json<RecordHistoryRequest>,
) -> Result<Json<Vec<String>>, ApiError> {
    let entries = blocking(move || {
        state.history.record(&request.query);
        state.history.entries()
    })
    .await?;
    Ok(Json(entries))
}

async fn api_today(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, ApiError> {
    let payload = blocking(move || {
        let today = today_local();
        let guard = state.terms.read();
        let term = state.daily.pick(guard.terms()?, today);
        Ok::<_, ApiError>(json!({ "date": date_key(today), "term": term }))
    })
    .await??;
    Ok(Json(payload))
}

async fn api_reload(State(state): State<SharedState>) -> Result<Json<serde_json::Value>, ApiError> {
    let fresh = load_term_store(&state.terms_path).await;
    let mut guard = state.terms.write();
    *guard = fresh;
    let count = guard.terms()?.len();
    Ok(Json(json!({ "status": LoadStatus::Loaded, "count": count })))
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, NON_ALPHANUMERIC).to_string()
}

fn browse_href(query: &str, category: &str) -> String {
    let mut href = format!("/?q={}", encode_component(query));
    if !category.is_empty() {
        href.push_str("&category=");
        href.push_str(&encode_component(category));
    }
    href
}

fn render_error_page(title: &str, detail: &str) -> String {
    ErrorTemplate { title, detail }
        .render()
        .unwrap_or_else(|_| title.to_string())
}

struct CategoryOption<'a> {
    value: &'a str,
    selected: bool,
}

struct TermCard {
    name_html: String,
    category: String,
    definition_html: String,
    example_html: String,
    formula: String,
}

#[derive(Default)]
struct DailyCard {
    date: String,
    name: String,
    definition: String,
    example: String,
}

struct RecentLink {
    text: String,
    href: String,
}

// Fields ending in `_html` are escaped by `Highlighted::to_html` before they
// reach the template.
#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Glossary</title>
    <link rel="canonical" href="{{ base_url }}/">
  </head>
  <body>
    <main>
      <form class="search-container" method="get" action="/">
        <input id="searchBar" type="search" name="q" value="{{ query }}" placeholder="Search terms" autocomplete="off">
        <select id="categoryFilter" name="category">
          <option value=""{% if category_all_selected %} selected{% endif %}>All</option>
          {% for option in categories %}
          <option value="{{ option.value }}"{% if option.selected %} selected{% endif %}>{{ option.value }}</option>
          {% endfor %}
        </select>
        <button type="submit">Search</button>
        {% if recent.len() > 0 %}
        <ul id="searchHistory">
          {% for item in recent %}
          <li><a href="{{ item.href }}">{{ item.text }}</a></li>
          {% endfor %}
        </ul>
        {% endif %}
      </form>

      {% if has_daily %}
      <section id="wotd">
        <h3>Word of the Day</h3>
        <p><strong>{{ daily.name }}</strong></p>
        <p>{{ daily.definition }}</p>
        {% if !daily.example.is_empty() %}
        <p><em>Example:</em> {{ daily.example }}</p>
        {% endif %}
        <p><small>{{ daily.date }}</small></p>
      </section>
      {% endif %}

      <section id="termList">
        {% if result_count == 0 %}
        <p>No terms found.</p>
        {% endif %}
        {% for card in cards %}
        <div class="term">
          <h2>{{ card.name_html|safe }}</h2>
          <p><strong>Category:</strong> {{ card.category }}</p>
          <p><strong>Definition:</strong> {{ card.definition_html|safe }}</p>
          {% if !card.example_html.is_empty() %}
          <p><strong>Example:</strong> {{ card.example_html|safe }}</p>
          {% endif %}
          {% if !card.formula.is_empty() %}
          <p><strong>Formula:</strong> {{ card.formula }}</p>
          {% endif %}
        </div>
        {% endfor %}
      </section>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct HomeTemplate<'a> {
    base_url: &'a str,
    query: &'a str,
    category_all_selected: bool,
    categories: Vec<CategoryOption<'a>>,
    result_count: usize,
    cards: Vec<TermCard>,
    has_daily: bool,
    daily: DailyCard,
    recent: Vec<RecentLink>,
}

#[derive(Template)]
#[template(
    source = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <title>Glossary • Error</title>
  </head>
  <body>
    <main>
      <h1>{{ title }}</h1>
      <p>{{ detail }}</p>
      <a href="/">Back to the glossary</a>
    </main>
  </body>
</html>"#,
    ext = "html"
)]
struct ErrorTemplate<'a> {
    title: &'a str,
    detail: &'a str,
}
