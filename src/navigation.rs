//! Browser routes and the page state they map to.
//!
//! The client keeps one [`Navigator`]; every transition replaces the
//! current [`NavigationState`] and notifies subscribers through a
//! `tokio::sync::watch` channel. The server side uses the same mapping to
//! decide which paths get the SPA shell and which are 404.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::Uri,
    response::{Html, IntoResponse},
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{AppError, AppResult};
use crate::models::{ApiResponse, ViewMode};
use crate::AppState;

pub const INDEX_FILE: &str = "index.html";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Page {
    #[default]
    Home,
    Notes,
    AddPaper,
    ManagePaper,
    Settings,
    CreateCollection,
    Collection,
}

/// A recognised browser path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Home,
    Notes(u64),
    AddPaper,
    ManagePaper(u64),
    Settings,
    NewCollection,
    EditCollection(u64),
    Collection(u64),
}

impl Route {
    /// Parse a URL path. Trailing slashes are ignored; anything else that
    /// does not name a page is `None`.
    pub fn parse(path: &str) -> Option<Route> {
        let trimmed = path.trim_end_matches('/');
        let segments: Vec<&str> = trimmed.split('/').skip(1).collect();
        let id = |s: &str| s.parse::<u64>().ok();

        match segments.as_slice() {
            [] => Some(Route::Home),
            ["notes", paper] => id(paper).map(Route::Notes),
            ["add"] => Some(Route::AddPaper),
            ["manage", paper] => id(paper).map(Route::ManagePaper),
            ["settings"] => Some(Route::Settings),
            ["collections", "new"] => Some(Route::NewCollection),
            ["collections", "edit", c] => id(c).map(Route::EditCollection),
            ["collections", c] => id(c).map(Route::Collection),
            _ => None,
        }
    }

    pub fn path(&self) -> String {
        match self {
            Route::Home => "/".to_string(),
            Route::Notes(id) => format!("/notes/{}", id),
            Route::AddPaper => "/add".to_string(),
            Route::ManagePaper(id) => format!("/manage/{}", id),
            Route::Settings => "/settings".to_string(),
            Route::NewCollection => "/collections/new".to_string(),
            Route::EditCollection(id) => format!("/collections/edit/{}", id),
            Route::Collection(id) => format!("/collections/{}", id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationState {
    pub current_page: Page,
    pub selected_paper_id: Option<u64>,
    pub selected_collection_id: Option<u64>,
    pub view_mode: ViewMode,
    pub is_loading: bool,
}

impl NavigationState {
    /// Apply the page and selection a route implies, keeping view mode and
    /// loading flag.
    pub fn enter(&mut self, route: Route) {
        let (page, paper, collection) = match route {
            Route::Home => (Page::Home, None, None),
            Route::Notes(id) => (Page::Notes, Some(id), self.selected_collection_id),
            Route::AddPaper => (Page::AddPaper, None, self.selected_collection_id),
            Route::ManagePaper(id) => (Page::ManagePaper, Some(id), self.selected_collection_id),
            Route::Settings => (Page::Settings, None, self.selected_collection_id),
            Route::NewCollection => (Page::CreateCollection, None, None),
            Route::EditCollection(id) => (Page::CreateCollection, None, Some(id)),
            Route::Collection(id) => (Page::Collection, None, Some(id)),
        };
        self.current_page = page;
        self.selected_paper_id = paper;
        self.selected_collection_id = collection;
    }

    /// The route for the current state. A page that needs a selection it
    /// does not have falls back to `/`.
    pub fn route(&self) -> Route {
        match (self.current_page, self.selected_paper_id, self.selected_collection_id) {
            (Page::Notes, Some(id), _) => Route::Notes(id),
            (Page::ManagePaper, Some(id), _) => Route::ManagePaper(id),
            (Page::AddPaper, _, _) => Route::AddPaper,
            (Page::Settings, _, _) => Route::Settings,
            (Page::CreateCollection, _, Some(id)) => Route::EditCollection(id),
            (Page::CreateCollection, _, None) => Route::NewCollection,
            (Page::Collection, _, Some(id)) => Route::Collection(id),
            _ => Route::Home,
        }
    }

    pub fn from_path(path: &str, view_mode: ViewMode) -> NavigationState {
        let mut state = NavigationState {
            view_mode,
            ..Default::default()
        };
        state.enter(Route::parse(path).unwrap_or(Route::Home));
        state
    }
}

/// Client-side navigation state holder.
pub struct Navigator {
    tx: watch::Sender<NavigationState>,
}

impl Navigator {
    pub fn new(initial: NavigationState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    pub fn from_path(path: &str, view_mode: ViewMode) -> Self {
        Self::new(NavigationState::from_path(path, view_mode))
    }

    /// The receiver starts out holding the current state.
    pub fn subscribe(&self) -> watch::Receiver<NavigationState> {
        self.tx.subscribe()
    }

    pub fn state(&self) -> NavigationState {
        self.tx.borrow().clone()
    }

    pub fn path(&self) -> String {
        self.tx.borrow().route().path()
    }

    fn update(&self, f: impl FnOnce(&mut NavigationState)) {
        self.tx.send_modify(f);
    }

    pub fn navigate(&self, route: Route) {
        self.update(|s| s.enter(route));
    }

    /// Re-sync with the browser after a back/forward. Unknown paths go home.
    pub fn handle_pop(&self, path: &str) {
        self.navigate(Route::parse(path).unwrap_or(Route::Home));
    }

    pub fn go_to_home(&self) {
        self.navigate(Route::Home);
    }

    pub fn go_to_notes(&self, paper_id: u64) {
        self.navigate(Route::Notes(paper_id));
    }

    pub fn go_to_add_paper(&self) {
        self.navigate(Route::AddPaper);
    }

    pub fn go_to_manage_paper(&self, paper_id: u64) {
        self.navigate(Route::ManagePaper(paper_id));
    }

    pub fn go_to_settings(&self) {
        self.navigate(Route::Settings);
    }

    pub fn go_to_create_collection(&self, collection_id: Option<u64>) {
        self.navigate(match collection_id {
            Some(id) => Route::EditCollection(id),
            None => Route::NewCollection,
        });
    }

    pub fn go_to_collection(&self, collection_id: u64) {
        self.navigate(Route::Collection(collection_id));
    }

    pub fn set_selected_paper(&self, paper_id: Option<u64>) {
        self.update(|s| s.selected_paper_id = paper_id);
    }

    pub fn set_selected_collection(&self, collection_id: Option<u64>) {
        self.update(|s| s.selected_collection_id = collection_id);
    }

    pub fn set_view_mode(&self, mode: ViewMode) {
        self.update(|s| s.view_mode = mode);
    }

    pub fn set_loading(&self, loading: bool) {
        self.update(|s| s.is_loading = loading);
    }
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    #[serde(default)]
    pub path: String,
}

/// Initial state for a browser path, with the stored view mode.
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResolveQuery>,
) -> AppResult<impl IntoResponse> {
    let route = Route::parse(&query.path)
        .ok_or_else(|| AppError::NotFound(format!("Page {}", query.path)))?;
    let mut nav = NavigationState {
        view_mode: state.store.settings()?.view_mode,
        ..Default::default()
    };
    nav.enter(route);
    Ok(ApiResponse::ok(nav))
}

/// Serve the frontend's `index.html` for every page route.
pub async fn spa_shell(State(state): State<Arc<AppState>>, uri: Uri) -> AppResult<Html<String>> {
    if Route::parse(uri.path()).is_none() {
        return Err(AppError::NotFound(format!("Page {}", uri.path())));
    }
    let index = state.config.frontend_dir.join(INDEX_FILE);
    match tokio::fs::read_to_string(&index).await {
        Ok(html) => Ok(Html(html)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %index.display(), "Frontend build missing");
            Err(AppError::NotFound("Frontend build".to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_routes() {
        assert_eq!(Route::parse("/"), Some(Route::Home));
        assert_eq!(Route::parse(""), Some(Route::Home));
        assert_eq!(Route::parse("/notes/12"), Some(Route::Notes(12)));
        assert_eq!(Route::parse("/notes/12/"), Some(Route::Notes(12)));
        assert_eq!(Route::parse("/add"), Some(Route::AddPaper));
        assert_eq!(Route::parse("/settings"), Some(Route::Settings));
        assert_eq!(Route::parse("/collections/new"), Some(Route::NewCollection));
        assert_eq!(Route::parse("/collections/edit/3"), Some(Route::EditCollection(3)));
        assert_eq!(Route::parse("/collections/3"), Some(Route::Collection(3)));

        assert_eq!(Route::parse("/notes/abc"), None);
        assert_eq!(Route::parse("/notes"), None);
        assert_eq!(Route::parse("/unknown"), None);
        assert_eq!(Route::parse("/settings/extra"), None);
    }

    #[test]
    fn test_route_path_round_trips() {
        for route in [
            Route::Home,
            Route::Notes(4),
            Route::AddPaper,
            Route::ManagePaper(9),
            Route::Settings,
            Route::NewCollection,
            Route::EditCollection(2),
            Route::Collection(2),
        ] {
            assert_eq!(Route::parse(&route.path()), Some(route));
        }
    }

    #[test]
    fn test_go_to_notes_then_home_clears_paper() {
        let nav = Navigator::new(NavigationState::default());
        nav.go_to_notes(7);
        let state = nav.state();
        assert_eq!(state.current_page, Page::Notes);
        assert_eq!(state.selected_paper_id, Some(7));
        assert_eq!(nav.path(), "/notes/7");

        nav.go_to_home();
        let state = nav.state();
        assert_eq!(state.current_page, Page::Home);
        assert_eq!(state.selected_paper_id, None);
        assert_eq!(nav.path(), "/");
    }

    #[test]
    fn test_collection_pages_keep_selection() {
        let nav = Navigator::new(NavigationState::default());
        nav.go_to_collection(5);
        nav.go_to_settings();
        assert_eq!(nav.state().selected_collection_id, Some(5));
        nav.go_to_create_collection(None);
        assert_eq!(nav.state().selected_collection_id, None);
        assert_eq!(nav.path(), "/collections/new");
    }

    #[test]
    fn test_notes_page_without_paper_maps_to_root() {
        let state = NavigationState {
            current_page: Page::Notes,
            ..Default::default()
        };
        assert_eq!(state.route(), Route::Home);
    }

    #[test]
    fn test_from_path_unknown_is_home_with_view_mode() {
        let state = NavigationState::from_path("/nowhere", ViewMode::List);
        assert_eq!(state.current_page, Page::Home);
        assert_eq!(state.view_mode, ViewMode::List);

        let state = NavigationState::from_path("/notes/3", ViewMode::Grid);
        assert_eq!(state.current_page, Page::Notes);
        assert_eq!(state.selected_paper_id, Some(3));
    }

    #[test]
    fn test_subscribers_see_changes() {
        let nav = Navigator::from_path("/", ViewMode::Grid);
        let mut rx = nav.subscribe();
        assert_eq!(rx.borrow_and_update().current_page, Page::Home);

        nav.set_loading(true);
        nav.handle_pop("/add");
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.current_page, Page::AddPaper);
        assert!(seen.is_loading);

        nav.set_view_mode(ViewMode::List);
        assert_eq!(rx.borrow().view_mode, ViewMode::List);
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let state = NavigationState::from_path("/add", ViewMode::Grid);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["currentPage"], "add-paper");
        assert_eq!(json["viewMode"], "grid");
        assert!(json["selectedPaperId"].is_null());
    }
}
