//! Client-side routing: route table, navigation guard and the host
//! navigator abstraction.

pub mod guard;
pub mod navigator;
pub mod routes;

pub use guard::{GuardDecision, NavigationGuard, NavigationOutcome, Router, Target, REDIRECT_PARAM};
pub use navigator::{MemoryNavigator, Navigator};
pub use routes::{Route, RouteMeta, RouteTable};
