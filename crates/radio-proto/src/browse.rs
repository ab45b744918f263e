//! Browse state: the station list, genre filter, search results and
//! favorites, plus the generation counters that keep slow responses from
//! overwriting newer state.
//!
//! Two counters.  The list generation is bumped only by a reload; a
//! top-station response lands if no later reload was issued, whatever the
//! user did to the view meanwhile.  The view generation is bumped by every
//! action that changes which list the user is looking at (reload, search,
//! clearing the search, picking a genre); a search response lands only if it
//! carries the current view generation.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{BrowseSnapshot, LoadState};
use crate::station::StationRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BrowseError {
    #[error("unknown genre: {0}")]
    UnknownGenre(String),
}

/// The fixed genre tags offered by the page.  `All` disables filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Genre {
    #[default]
    All,
    Rock,
    Jazz,
    Classical,
    Pop,
    Electronic,
    News,
    Talk,
    Sports,
}

impl Genre {
    pub const TAGS: [Genre; 9] = [
        Genre::All,
        Genre::Rock,
        Genre::Jazz,
        Genre::Classical,
        Genre::Pop,
        Genre::Electronic,
        Genre::News,
        Genre::Talk,
        Genre::Sports,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Genre::All => "all",
            Genre::Rock => "rock",
            Genre::Jazz => "jazz",
            Genre::Classical => "classical",
            Genre::Pop => "pop",
            Genre::Electronic => "electronic",
            Genre::News => "news",
            Genre::Talk => "talk",
            Genre::Sports => "sports",
        }
    }

    /// Case-insensitive substring match against a station's genre tag.
    pub fn matches(&self, station_genre: &str) -> bool {
        match self {
            Genre::All => true,
            other => station_genre.to_lowercase().contains(other.as_str()),
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Genre {
    type Err = BrowseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Genre::TAGS
            .into_iter()
            .find(|g| g.as_str() == wanted)
            .ok_or_else(|| BrowseError::UnknownGenre(s.to_string()))
    }
}

#[derive(Debug, Default)]
pub struct BrowseState {
    all: Vec<StationRecord>,
    visible: Vec<StationRecord>,
    genre: Genre,
    search_query: Option<String>,
    search_error: Option<String>,
    list_load: LoadState,
    favorites: HashSet<String>,
    generation: u64,
    list_generation: u64,
    fetched_at: Option<DateTime<Local>>,
}

impl BrowseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    pub fn list_generation(&self) -> u64 {
        self.list_generation
    }

    pub fn is_current_list(&self, list_generation: u64) -> bool {
        list_generation == self.list_generation
    }

    fn bump(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    // ── top-station list ──────────────────────────────────────────────────────

    /// Start a top-station fetch.  Leaves search mode (so a pending search
    /// goes stale); returns the list generation the response must carry.
    pub fn begin_reload(&mut self) -> u64 {
        self.search_query = None;
        self.search_error = None;
        self.list_load = LoadState::Loading;
        self.bump();
        self.list_generation += 1;
        self.list_generation
    }

    /// Replace the full list wholesale and re-filter it by the current genre,
    /// unless a search owns the view.  Returns `false` for a stale response.
    pub fn apply_top_stations(&mut self, list_generation: u64, stations: Vec<StationRecord>) -> bool {
        if !self.is_current_list(list_generation) {
            return false;
        }
        self.all = stations;
        if self.search_query.is_none() {
            self.visible = self.filtered_all();
        }
        self.list_load = LoadState::Ready;
        self.fetched_at = Some(Local::now());
        true
    }

    /// Record a failed top-station fetch.  Returns `false` for a stale response.
    pub fn fail_load(&mut self, list_generation: u64, message: impl Into<String>) -> bool {
        if !self.is_current_list(list_generation) {
            return false;
        }
        self.list_load = LoadState::Failed(message.into());
        true
    }

    // ── search ────────────────────────────────────────────────────────────────

    /// Issue a search.  Search and genre filtering are separate views, so the
    /// genre resets to `All`.  The visible list stays as it is until results
    /// arrive.
    pub fn begin_search(&mut self, query: impl Into<String>) -> u64 {
        self.search_query = Some(query.into());
        self.search_error = None;
        self.genre = Genre::All;
        self.bump()
    }

    /// Show a search result set.  An empty set is a valid (empty) view.
    pub fn apply_search(&mut self, generation: u64, results: Vec<StationRecord>) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.visible = results;
        self.search_error = None;
        self.fetched_at = Some(Local::now());
        true
    }

    pub fn fail_search(&mut self, generation: u64, message: impl Into<String>) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.search_error = Some(message.into());
        true
    }

    /// Blank query: drop search mode and show the full, unfiltered list
    /// immediately.  Any in-flight search becomes stale.
    pub fn clear_search(&mut self) {
        self.search_query = None;
        self.search_error = None;
        self.genre = Genre::All;
        self.visible = self.all.clone();
        self.bump();
    }

    // ── genre ─────────────────────────────────────────────────────────────────

    /// Filter the full list by genre.  Abandons any active search.
    pub fn set_genre(&mut self, genre: Genre) {
        self.genre = genre;
        self.search_query = None;
        self.search_error = None;
        self.visible = self.filtered_all();
        self.bump();
    }

    fn filtered_all(&self) -> Vec<StationRecord> {
        self.all
            .iter()
            .filter(|s| self.genre.matches(&s.genre))
            .cloned()
            .collect()
    }

    // ── favorites ─────────────────────────────────────────────────────────────

    /// Flip membership of `id`.  Returns whether it is now a favorite.
    pub fn toggle_favorite(&mut self, id: &str) -> bool {
        if self.favorites.remove(id) {
            false
        } else {
            self.favorites.insert(id.to_string());
            true
        }
    }

    pub fn is_favorite(&self, id: &str) -> bool {
        self.favorites.contains(id)
    }

    /// Favorite stations that are currently known, in list order.
    pub fn favorites(&self) -> Vec<&StationRecord> {
        let mut seen = HashSet::new();
        self.all
            .iter()
            .chain(self.visible.iter())
            .filter(|s| self.favorites.contains(&s.id) && seen.insert(s.id.as_str()))
            .collect()
    }

    // ── accessors ─────────────────────────────────────────────────────────────

    /// Find a station the user can select: visible first, then the full list.
    pub fn find(&self, id: &str) -> Option<&StationRecord> {
        self.visible
            .iter()
            .chain(self.all.iter())
            .find(|s| s.id == id)
    }

    pub fn visible(&self) -> &[StationRecord] {
        &self.visible
    }

    pub fn genre(&self) -> Genre {
        self.genre
    }

    pub fn search_query(&self) -> Option<&str> {
        self.search_query.as_deref()
    }

    /// Load state of the current view.  A failed search replaces the list.
    pub fn load(&self) -> LoadState {
        match (&self.search_query, &self.search_error) {
            (Some(_), Some(err)) => LoadState::Failed(err.clone()),
            _ => self.list_load.clone(),
        }
    }

    pub fn snapshot(&self, is_searching: bool) -> BrowseSnapshot {
        let mut favorite_ids: Vec<String> = self.favorites.iter().cloned().collect();
        favorite_ids.sort();
        BrowseSnapshot {
            visible: self.visible.clone(),
            genre: self.genre,
            search_query: self.search_query.clone(),
            is_searching,
            load: self.load(),
            favorite_ids,
            favorites: self.favorites().into_iter().cloned().collect(),
            total_stations: self.all.len(),
            fetched_at: self.fetched_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str, genre: &str) -> StationRecord {
        StationRecord {
            id: id.to_string(),
            name: format!("Station {id}"),
            stream_url: format!("http://stream/{id}"),
            country: "Unknown".into(),
            country_code: "XX".into(),
            language: "Unknown".into(),
            genre: genre.to_string(),
            votes: 0,
            click_count: 0,
            favicon_url: None,
            codec: "MP3".into(),
        }
    }

    fn ids(stations: &[StationRecord]) -> Vec<&str> {
        stations.iter().map(|s| s.id.as_str()).collect()
    }

    fn loaded() -> BrowseState {
        let mut browse = BrowseState::new();
        let gen = browse.begin_reload();
        assert!(browse.apply_top_stations(
            gen,
            vec![
                station("a", "Jazz"),
                station("b", "rock"),
                station("c", "smooth jazz"),
                station("d", "Various"),
            ],
        ));
        browse
    }

    #[test]
    fn test_genre_parse_is_case_insensitive() {
        assert_eq!("Jazz".parse::<Genre>().unwrap(), Genre::Jazz);
        assert_eq!(" ALL ".parse::<Genre>().unwrap(), Genre::All);
        assert_eq!(
            "polka".parse::<Genre>(),
            Err(BrowseError::UnknownGenre("polka".into()))
        );
    }

    #[test]
    fn test_genre_filter_substring_match() {
        let mut browse = loaded();
        browse.set_genre(Genre::Jazz);
        assert_eq!(ids(browse.visible()), vec!["a", "c"]);

        browse.set_genre(Genre::All);
        assert_eq!(ids(browse.visible()), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_genre_abandons_search() {
        let mut browse = loaded();
        let gen = browse.begin_search("jaz");
        browse.set_genre(Genre::Rock);

        assert!(browse.search_query().is_none());
        assert!(!browse.apply_search(gen, vec![station("x", "jazz")]));
        assert_eq!(ids(browse.visible()), vec!["b"]);
    }

    #[test]
    fn test_stale_search_is_discarded() {
        let mut browse = loaded();
        let first = browse.begin_search("ja");
        let second = browse.begin_search("jazz");

        assert!(browse.apply_search(second, vec![station("r2", "jazz")]));
        assert!(!browse.apply_search(first, vec![station("r1", "jazz")]));
        assert_eq!(ids(browse.visible()), vec!["r2"]);
    }

    #[test]
    fn test_clear_search_restores_full_list() {
        let mut browse = loaded();
        browse.set_genre(Genre::Rock);
        let gen = browse.begin_search("x");
        assert_eq!(browse.genre(), Genre::All);
        assert!(browse.apply_search(gen, vec![]));
        assert!(browse.visible().is_empty());

        browse.clear_search();
        assert_eq!(ids(browse.visible()), vec!["a", "b", "c", "d"]);
        assert!(browse.search_query().is_none());

        // Clearing the box drops a genre filter as well.
        browse.set_genre(Genre::Jazz);
        browse.clear_search();
        assert_eq!(browse.genre(), Genre::All);
        assert_eq!(browse.visible().len(), 4);
    }

    #[test]
    fn test_failed_search_replaces_view_until_cleared() {
        let mut browse = loaded();
        let gen = browse.begin_search("x");
        assert!(browse.fail_search(gen, "Search failed"));
        assert_eq!(browse.load(), LoadState::Failed("Search failed".into()));

        browse.clear_search();
        assert_eq!(browse.load(), LoadState::Ready);
    }

    #[test]
    fn test_reload_supersedes_pending_load() {
        let mut browse = BrowseState::new();
        let old = browse.begin_reload();
        let new = browse.begin_reload();
        assert!(!browse.fail_load(old, "boom"));
        assert_eq!(browse.load(), LoadState::Loading);
        assert!(browse.apply_top_stations(new, vec![station("a", "pop")]));
        assert_eq!(browse.load(), LoadState::Ready);
        assert!(browse.snapshot(false).fetched_at.is_some());
    }

    #[test]
    fn test_genre_pick_during_load_keeps_incoming_list() {
        let mut browse = BrowseState::new();
        let gen = browse.begin_reload();
        browse.set_genre(Genre::Jazz);
        assert!(browse.apply_top_stations(
            gen,
            vec![station("a", "Jazz"), station("b", "rock"), station("c", "smooth jazz")],
        ));
        assert_eq!(browse.load(), LoadState::Ready);
        assert_eq!(ids(browse.visible()), vec!["a", "c"]);
    }

    #[test]
    fn test_top_list_under_active_search_keeps_results() {
        let mut browse = BrowseState::new();
        let list_gen = browse.begin_reload();
        let search_gen = browse.begin_search("jazz");
        assert!(browse.apply_search(search_gen, vec![station("z", "jazz")]));
        assert!(browse.apply_top_stations(list_gen, vec![station("a", "Jazz"), station("b", "rock")]));
        assert_eq!(ids(browse.visible()), vec!["z"]);
        assert_eq!(browse.snapshot(false).total_stations, 2);

        browse.clear_search();
        assert_eq!(ids(browse.visible()), vec!["a", "b"]);
    }

    #[test]
    fn test_toggle_favorite_twice_is_noop() {
        let mut browse = loaded();
        assert!(browse.toggle_favorite("a"));
        assert!(browse.is_favorite("a"));
        assert!(!browse.toggle_favorite("a"));
        assert!(!browse.is_favorite("a"));
        assert!(browse.snapshot(false).favorite_ids.is_empty());
    }

    #[test]
    fn test_favorites_lists_known_stations_once() {
        let mut browse = loaded();
        browse.toggle_favorite("c");
        browse.toggle_favorite("zz");
        let favs: Vec<&str> = browse.favorites().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(favs, vec!["c"]);
    }
}
