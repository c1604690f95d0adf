//! Navigation guard and router.
//!
//! Every in-app navigation passes through [`NavigationGuard::check`] before
//! the location changes. The guard waits for session initialization, then
//! either lets the navigation proceed or redirects it.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Url;
use tracing::{debug, error, info, warn};

use crate::api::LOGIN_PATH;
use crate::auth::SessionManager;

use super::navigator::Navigator;
use super::routes::{RouteMeta, RouteTable};

/// Query parameter carrying the page to return to after login
pub const REDIRECT_PARAM: &str = "redirect";

const ROOT_PATH: &str = "/";

/// Redirect hops followed before a navigation is abandoned
const MAX_REDIRECTS: usize = 8;

/// Only used to parse and build relative locations
const BASE: &str = "http://app.invalid";

/// A parsed navigation target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub path: String,
    /// Path plus query, as it would appear in the location bar
    pub full_path: String,
    pub query: Vec<(String, String)>,
}

impl Target {
    pub fn parse(location: &str) -> Result<Self> {
        let location = location.trim();
        let relative = if location.starts_with('/') {
            location.to_string()
        } else {
            format!("/{}", location)
        };

        let base = Url::parse(BASE).context("Invalid base URL")?;
        let url = base
            .join(&relative)
            .with_context(|| format!("Invalid navigation target: {}", location))?;

        let full_path = match url.query() {
            Some(q) if !q.is_empty() => format!("{}?{}", url.path(), q),
            _ => url.path().to_string(),
        };

        Ok(Self {
            path: url.path().to_string(),
            full_path,
            query: url.query_pairs().map(|(k, v)| (k.into_owned(), v.into_owned())).collect(),
        })
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Login location that returns to `target` afterwards
fn login_redirect(target: &Target) -> Result<String> {
    let mut url = Url::parse(BASE)?.join(LOGIN_PATH)?;
    url.query_pairs_mut().append_pair(REDIRECT_PARAM, &target.full_path);
    Ok(format!("{}?{}", url.path(), url.query().unwrap_or_default()))
}

/// Resolve a return target against the app root. Anything that would leave
/// the app falls back to the root.
fn safe_return_path(value: Option<&str>) -> String {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return ROOT_PATH.to_string();
    };

    let resolved = Url::parse(BASE).and_then(|base| Ok((base.join(value)?, base)));
    match resolved {
        Ok((url, base)) if url.origin() == base.origin() => match url.query() {
            Some(q) if !q.is_empty() => format!("{}?{}", url.path(), q),
            _ => url.path().to_string(),
        },
        _ => {
            warn!(redirect = %value, "Ignoring non-local redirect target");
            ROOT_PATH.to_string()
        }
    }
}

/// Verdict of the guard for one navigation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    /// Signed-out user tried to enter a protected route
    RedirectLogin(String),
    /// Signed-in user tried to enter a route hidden from them
    RedirectHome(String),
}

pub struct NavigationGuard {
    session: Arc<SessionManager>,
    routes: RouteTable,
}

impl NavigationGuard {
    pub fn new(session: Arc<SessionManager>, routes: RouteTable) -> Self {
        Self { session, routes }
    }

    pub fn meta_for(&self, path: &str) -> Option<&RouteMeta> {
        self.routes.resolve(path).map(|r| &r.meta)
    }

    pub async fn check(&self, target: &Target) -> Result<GuardDecision> {
        if !self.session.is_initialized() {
            debug!("Waiting for session initialization");
            self.session.initialize().await;
        }

        let meta = self.meta_for(&target.path).cloned().unwrap_or_default();

        if meta.requires_auth && !self.session.is_logged_in() {
            return Ok(GuardDecision::RedirectLogin(login_redirect(target)?));
        }

        if meta.hide_for_auth && self.session.is_logged_in() {
            let to = safe_return_path(target.query_value(REDIRECT_PARAM));
            return Ok(GuardDecision::RedirectHome(to));
        }

        Ok(GuardDecision::Proceed)
    }
}

/// How a navigation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationOutcome {
    Proceeded(String),
    RedirectedToLogin(String),
    Redirected(String),
    /// The navigation failed; the location did not change
    Aborted,
}

impl NavigationOutcome {
    /// Final location, if the navigation landed anywhere
    pub fn location(&self) -> Option<&str> {
        match self {
            NavigationOutcome::Proceeded(p)
            | NavigationOutcome::RedirectedToLogin(p)
            | NavigationOutcome::Redirected(p) => Some(p),
            NavigationOutcome::Aborted => None,
        }
    }
}

#[derive(Clone, Copy)]
enum RedirectKind {
    Login,
    Home,
}

pub struct Router {
    guard: NavigationGuard,
    navigator: Arc<dyn Navigator>,
    app_name: String,
}

impl Router {
    pub fn new(guard: NavigationGuard, navigator: Arc<dyn Navigator>, app_name: &str) -> Self {
        Self {
            guard,
            navigator,
            app_name: app_name.to_string(),
        }
    }

    pub fn guard(&self) -> &NavigationGuard {
        &self.guard
    }

    /// Navigate to `location`, following guard redirects.
    ///
    /// Errors are logged and reported as [`NavigationOutcome::Aborted`].
    pub async fn push(&self, location: &str) -> NavigationOutcome {
        match self.resolve(location).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(location, error = %e, "Navigation failed");
                NavigationOutcome::Aborted
            }
        }
    }

    async fn resolve(&self, location: &str) -> Result<NavigationOutcome> {
        let mut current = location.to_string();
        let mut redirected: Option<RedirectKind> = None;

        for _ in 0..=MAX_REDIRECTS {
            let target = Target::parse(&current)?;
            match self.guard.check(&target).await? {
                GuardDecision::Proceed => {
                    self.apply_title(&target.path);
                    self.navigator.push(&target.full_path);
                    let landed = target.full_path;
                    return Ok(match redirected {
                        None => NavigationOutcome::Proceeded(landed),
                        Some(RedirectKind::Login) => NavigationOutcome::RedirectedToLogin(landed),
                        Some(RedirectKind::Home) => NavigationOutcome::Redirected(landed),
                    });
                }
                GuardDecision::RedirectLogin(to) => {
                    info!(from = %target.full_path, to = %to, "Login required");
                    redirected.get_or_insert(RedirectKind::Login);
                    current = to;
                }
                GuardDecision::RedirectHome(to) => {
                    debug!(from = %target.full_path, to = %to, "Already signed in, redirecting");
                    redirected.get_or_insert(RedirectKind::Home);
                    current = to;
                }
            }
        }

        Err(anyhow::anyhow!("Too many redirects navigating to {}", location))
    }

    fn apply_title(&self, path: &str) {
        if let Some(meta) = self.guard.meta_for(path) {
            if !meta.title.is_empty() {
                self.navigator
                    .set_title(&format!("{} - {}", meta.title, self.app_name));
            }
        }
    }
}
