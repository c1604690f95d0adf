//! Route table and per-route access rules.

/// Access rules attached to a route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct RouteMeta {
    /// Only signed-in users may enter
    pub requires_auth: bool,
    /// Signed-in users are sent elsewhere (login, sign-up pages)
    pub hide_for_auth: bool,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: String,
    /// Path pattern; `:name` segments match any single non-empty segment
    pub pattern: String,
    pub meta: RouteMeta,
}

impl Route {
    pub fn new(name: &str, pattern: &str, title: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            meta: RouteMeta {
                title: title.to_string(),
                ..RouteMeta::default()
            },
        }
    }

    pub fn requires_auth(mut self) -> Self {
        self.meta.requires_auth = true;
        self
    }

    pub fn hide_for_auth(mut self) -> Self {
        self.meta.hide_for_auth = true;
        self
    }

    pub fn matches(&self, path: &str) -> bool {
        let mut pattern = segments(&self.pattern);
        let mut actual = segments(path);
        loop {
            match (pattern.next(), actual.next()) {
                (None, None) => return true,
                (Some(p), Some(a)) if p.starts_with(':') || p == a => continue,
                _ => return false,
            }
        }
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Self {
        Self { routes }
    }

    /// First route whose pattern matches `path` (no query string)
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.matches(path))
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(vec![
            Route::new("home", "/", "Home"),
            Route::new("login", "/login", "Login").hide_for_auth(),
            Route::new("characters", "/characters", "Characters"),
            Route::new("create-character", "/characters/create", "Create Character").requires_auth(),
            Route::new("edit-character", "/characters/:id/edit", "Edit Character").requires_auth(),
            Route::new("chat", "/chat/:characterId", "Chat"),
            Route::new("chat-conversation", "/chat/:characterId/:conversationId", "Chat"),
            Route::new("test-characters", "/test-characters", "Character API Test"),
        ])
    }
}
