//! Route and filter registration, compilation, and hot reload.
//!
//! # Lifecycle
//!
//! ```text
//! bootstrap / rescan
//!     → RoutingBuilder::on / before / after   (record only, nothing validated)
//!     → RoutingBuilder::build                 (parse patterns, build both trees)
//!     → Routing                               (immutable, shared by every request)
//!
//! hot reload
//!     → SharedRouting::rebuild(builder)
//!     → new Routing built off to the side
//!     → swapped in atomically on success; old tables kept on failure
//! ```
//!
//! Requests never wait on a rebuild. Each one takes a snapshot with
//! [`SharedRouting::load`] and keeps using it even if a newer table is
//! swapped in while it runs.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use tracing::{error, info};

use crate::error::RouteError;
use crate::filter::{FilterDef, FilterMatch, FilterTree};
use crate::method::Method;
use crate::router::{RouteMatch, RouteTree};

/// Collects route and filter registrations.
///
/// Each call returns `self` so registrations chain naturally:
///
/// ```rust
/// use trellis::{Method, RoutingBuilder};
///
/// let routing = RoutingBuilder::new()
///     .get("/users/:id", "show_user")
///     .on(Method::Delete, "/users/:id", "delete_user")
///     .before("require_login", "/users/*", "login_filter")
///     .build()
///     .expect("valid routes");
///
/// let m = routing.route(Method::Get, "/users/42").unwrap();
/// assert_eq!(*m.payload, "show_user");
/// assert_eq!(m.param("id"), Some("42"));
/// ```
pub struct RoutingBuilder<T, H> {
    routes: Vec<(Method, String, T)>,
    filters: Vec<FilterDef<H>>,
}

impl<T, H> RoutingBuilder<T, H> {
    pub fn new() -> Self {
        Self { routes: Vec::new(), filters: Vec::new() }
    }

    /// Registers a route for a method + pattern pair.
    pub fn on(mut self, method: Method, pattern: impl Into<String>, payload: T) -> Self {
        self.routes.push((method, pattern.into(), payload));
        self
    }

    pub fn get(self, pattern: impl Into<String>, payload: T) -> Self {
        self.on(Method::Get, pattern, payload)
    }

    pub fn post(self, pattern: impl Into<String>, payload: T) -> Self {
        self.on(Method::Post, pattern, payload)
    }

    pub fn put(self, pattern: impl Into<String>, payload: T) -> Self {
        self.on(Method::Put, pattern, payload)
    }

    pub fn patch(self, pattern: impl Into<String>, payload: T) -> Self {
        self.on(Method::Patch, pattern, payload)
    }

    pub fn delete(self, pattern: impl Into<String>, payload: T) -> Self {
        self.on(Method::Delete, pattern, payload)
    }

    /// Registers a fully specified filter.
    pub fn filter(mut self, def: FilterDef<H>) -> Self {
        self.filters.push(def);
        self
    }

    /// Registers a before-filter on every method with [`Normal`](crate::Priority::Normal) priority.
    pub fn before(self, name: impl Into<String>, pattern: impl Into<String>, handler: H) -> Self {
        self.filter(FilterDef::before(name, pattern, handler))
    }

    /// Registers an after-filter on every method with [`Normal`](crate::Priority::Normal) priority.
    pub fn after(self, name: impl Into<String>, pattern: impl Into<String>, handler: H) -> Self {
        self.filter(FilterDef::after(name, pattern, handler))
    }

    /// Compiles every registration. Stops at the first configuration error.
    pub fn build(self) -> Result<Routing<T, H>, RouteError> {
        let mut routes = RouteTree::new();
        for (method, pattern, payload) in self.routes {
            routes.insert(method, &pattern, payload)?;
        }

        let mut filters = FilterTree::new();
        for def in self.filters {
            filters.insert(def)?;
        }

        info!(routes = routes.len(), filters = filters.len(), "routing tables built");
        Ok(Routing { routes, filters })
    }
}

impl<T, H> Default for RoutingBuilder<T, H> {
    fn default() -> Self { Self::new() }
}

/// Compiled route and filter tables.
pub struct Routing<T, H> {
    routes: RouteTree<T>,
    filters: FilterTree<H>,
}

impl<T, H> Routing<T, H> {
    pub fn route(&self, method: Method, path: &str) -> Option<RouteMatch<'_, T>> {
        self.routes.lookup(method, path)
    }

    pub fn filters(&self, path: &str, method: Method) -> FilterMatch<'_, H> {
        self.filters.lookup(path, method)
    }

    pub fn route_tree(&self) -> &RouteTree<T> {
        &self.routes
    }

    pub fn filter_tree(&self) -> &FilterTree<H> {
        &self.filters
    }
}

/// Routing tables that can be replaced while requests are in flight.
pub struct SharedRouting<T, H> {
    current: ArcSwap<Routing<T, H>>,
    rebuild: Mutex<()>,
}

impl<T, H> SharedRouting<T, H> {
    pub fn new(routing: Routing<T, H>) -> Self {
        Self { current: ArcSwap::from_pointee(routing), rebuild: Mutex::new(()) }
    }

    /// A snapshot of the tables currently in service.
    pub fn load(&self) -> Arc<Routing<T, H>> {
        self.current.load_full()
    }

    /// Builds `builder` and swaps it in.
    ///
    /// On failure the error is returned and the tables already in service
    /// stay untouched. Concurrent rebuilds run one at a time.
    pub fn rebuild(&self, builder: RoutingBuilder<T, H>) -> Result<(), RouteError> {
        let _guard = self.rebuild.lock().unwrap_or_else(PoisonError::into_inner);

        match builder.build() {
            Ok(routing) => {
                self.current.store(Arc::new(routing));
                info!("routing tables swapped in");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "rebuild rejected, keeping current routing tables");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Priority;

    type Builder = RoutingBuilder<&'static str, &'static str>;

    #[test]
    fn builds_routes_and_filters() {
        let routing = Builder::new()
            .get("/users/:id", "show")
            .post("/users", "create")
            .filter(FilterDef::before("auth", "/users/*", "auth").priority(Priority::High))
            .after("log", "/users/:id", "log")
            .build()
            .unwrap();

        assert_eq!(routing.route(Method::Post, "/users").map(|m| *m.payload), Some("create"));
        assert!(routing.route(Method::Put, "/users").is_none());

        let filters = routing.filters("/users/7", Method::Get);
        assert_eq!(filters.before_filters().len(), 1);
        assert_eq!(filters.after_filters().len(), 1);
        assert_eq!(routing.route_tree().len(), 2);
        assert_eq!(routing.filter_tree().len(), 2);
    }

    #[test]
    fn duplicate_route_fails_the_build() {
        let result = Builder::new().get("/x", "a").get("/x", "b").build();
        assert!(matches!(result, Err(RouteError::DuplicateRoute { .. })));
    }

    #[test]
    fn failed_rebuild_keeps_previous_tables() {
        let shared = SharedRouting::new(Builder::new().get("/old", "old").build().unwrap());

        let err = shared.rebuild(Builder::new().get("/new", "new").get("/bad/*/x", "bad"));
        assert!(matches!(err, Err(RouteError::InvalidPattern { .. })));

        let current = shared.load();
        assert_eq!(current.route(Method::Get, "/old").map(|m| *m.payload), Some("old"));
        assert!(current.route(Method::Get, "/new").is_none());
    }

    #[test]
    fn successful_rebuild_swaps_tables() {
        let shared = SharedRouting::new(Builder::new().get("/old", "old").build().unwrap());
        let before = shared.load();

        shared.rebuild(Builder::new().get("/new", "new")).unwrap();

        let after = shared.load();
        assert!(after.route(Method::Get, "/old").is_none());
        assert_eq!(after.route(Method::Get, "/new").map(|m| *m.payload), Some("new"));
        // A snapshot taken earlier keeps serving the old tables.
        assert_eq!(before.route(Method::Get, "/old").map(|m| *m.payload), Some("old"));
    }

    #[test]
    fn lookups_run_concurrently_with_rebuilds() {
        let shared = Arc::new(SharedRouting::new(Builder::new().get("/ping", "v0").build().unwrap()));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let routing = shared.load();
                        assert!(routing.route(Method::Get, "/ping").is_some());
                    }
                })
            })
            .collect();

        for version in ["v1", "v2", "v3"] {
            shared.rebuild(Builder::new().get("/ping", version)).unwrap();
        }
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(shared.load().route(Method::Get, "/ping").map(|m| *m.payload), Some("v3"));
    }
}
