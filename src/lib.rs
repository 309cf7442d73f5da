//! # trellis
//!
//! The request-side core of a web framework: route dispatch, filters and
//! authentication. Transport is someone else's job.
//!
//! ## What's here
//!
//! - Segment-tree routing: one tree per HTTP method, `:name` parameters,
//!   trailing `*` wildcards, literal segments always preferred
//! - Filters: before/after hooks keyed by path pattern, every match collected
//!   and ordered by [`Priority`]
//! - Hot-swappable route tables through [`SharedRouting`]
//! - Session login with single-use "remember me" tokens and escalating
//!   throttling of failed attempts ([`auth`])
//!
//! What's left out: sockets, HTTP parsing, cookie signing and session
//! persistence. The framework that embeds trellis owns those and hands
//! them in through the [`auth::store`] traits.
//!
//! ## Quick start
//!
//! ```rust
//! use trellis::{Method, RoutingBuilder};
//!
//! let routing = RoutingBuilder::new()
//!     .get("/users/:id", "show_user")
//!     .post("/users", "create_user")
//!     .get("/assets/*", "static_files")
//!     .before("auth", "/users/*", "require_login")
//!     .build()
//!     .unwrap();
//!
//! let hit = routing.route(Method::Get, "/users/42").unwrap();
//! assert_eq!(*hit.payload, "show_user");
//! assert_eq!(hit.param("id"), Some("42"));
//!
//! let filters = routing.filters("/users/42", Method::Get);
//! assert_eq!(filters.before_filters().len(), 1);
//!
//! // Unknown method on a known path: 405 territory, not 404.
//! assert!(routing.route(Method::Delete, "/users/42").is_none());
//! assert!(routing.route_tree().allowed_methods("/users/42").contains(Method::Get));
//! ```

mod error;
mod filter;
mod method;
mod path;
mod router;
mod routing;

pub mod auth;
pub mod config;

pub use auth::store::{
    AttemptWindow, AuthAttempt, AuthToken, AuthUser, Clock, CookieStore, SessionStore,
    SessionValue, SystemClock, TokenKind, TokenStore, UserId, UserStore,
};
pub use auth::throttle::Throttle;
pub use auth::{Auth, AuthServices};
pub use config::{AuthConfig, Config, ThrottleConfig};
pub use error::{
    AuthError, AuthErrorKind, AuthResult, ConfigError, RouteError, StoreError, StoreResult,
};
pub use filter::{Filter, FilterDef, FilterKind, FilterMatch, FilterTree, Priority};
pub use method::{Method, MethodSet};
pub use path::{Pattern, Segment, segments};
pub use router::{RouteMatch, RouteTree};
pub use routing::{Routing, RoutingBuilder, SharedRouting};
