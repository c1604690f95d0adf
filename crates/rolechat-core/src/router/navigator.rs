use std::sync::{Mutex, MutexGuard, PoisonError};

/// The host's location bar and document title.
///
/// `push` is an in-app transition that keeps application state; `hard_navigate`
/// is a full page load that starts the application over at `href`.
pub trait Navigator: Send + Sync {
    /// Path of the current location, without query string
    fn current_path(&self) -> String;

    fn push(&self, full_path: &str);

    fn hard_navigate(&self, href: &str);

    fn set_title(&self, title: &str);
}

#[derive(Debug, Default)]
struct Location {
    full_path: String,
    title: Option<String>,
    history: Vec<String>,
    hard_navigations: Vec<String>,
}

/// Navigator that only records where the application went.
#[derive(Debug)]
pub struct MemoryNavigator {
    location: Mutex<Location>,
}

impl MemoryNavigator {
    pub fn new(start: &str) -> Self {
        Self {
            location: Mutex::new(Location {
                full_path: start.to_string(),
                ..Location::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Location> {
        self.location.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current_full_path(&self) -> String {
        self.lock().full_path.clone()
    }

    pub fn title(&self) -> Option<String> {
        self.lock().title.clone()
    }

    /// Paths pushed through in-app navigation, oldest first
    pub fn history(&self) -> Vec<String> {
        self.lock().history.clone()
    }

    /// Targets of full page loads, oldest first
    pub fn hard_navigations(&self) -> Vec<String> {
        self.lock().hard_navigations.clone()
    }
}

impl Default for MemoryNavigator {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Navigator for MemoryNavigator {
    fn current_path(&self) -> String {
        let location = self.lock();
        match location.full_path.split_once(['?', '#']) {
            Some((path, _)) => path.to_string(),
            None => location.full_path.clone(),
        }
    }

    fn push(&self, full_path: &str) {
        let mut location = self.lock();
        location.full_path = full_path.to_string();
        location.history.push(full_path.to_string());
    }

    fn hard_navigate(&self, href: &str) {
        let mut location = self.lock();
        location.full_path = href.to_string();
        location.hard_navigations.push(href.to_string());
    }

    fn set_title(&self, title: &str) {
        self.lock().title = Some(title.to_string());
    }
}
