//! Segment-tree request router.
//!
//! One tree per HTTP method. Every node has three kinds of branch: a map of
//! literal children, at most one parameter child, and at most one wildcard
//! child. Lookup walks one node per path segment, so its cost depends on the
//! depth of the path and never on how many routes are registered.
//!
//! # Matching rules
//!
//! At each level the literal child wins, then the parameter child, then the
//! wildcard child. The walk never backtracks: with routes `/a/:x/c` and
//! `/a/b`, the path `/a/b/c` follows the literal `b`, dead-ends, and is a
//! miss even though `/a/:x/c` would have matched. Register the more specific
//! route explicitly if you need both.

use std::collections::HashMap;

use tracing::debug;

use crate::error::RouteError;
use crate::method::{Method, MethodSet};
use crate::path::{Pattern, Segment, segments};

/// A successful [`RouteTree::lookup`].
#[derive(Debug)]
pub struct RouteMatch<'a, T> {
    pub payload: &'a T,
    /// Parameter bindings, keyed by the name declared in the pattern.
    pub params: HashMap<String, String>,
    /// Segments consumed by a trailing `*`, in path order. Empty when the
    /// matched route has no wildcard.
    pub wildcard: Vec<String>,
}

impl<T> RouteMatch<'_, T> {
    /// For a route `/users/:id`, `m.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// The wildcard tail joined back into a relative path (`img/logo.png`).
    pub fn wildcard_path(&self) -> String {
        self.wildcard.join("/")
    }
}

struct ParamChild<T> {
    name: String,
    node: Box<Node<T>>,
}

struct Node<T> {
    payload: Option<T>,
    children: Option<HashMap<String, Node<T>>>,
    param: Option<ParamChild<T>>,
    wildcard: Option<Box<Node<T>>>,
}

impl<T> Node<T> {
    fn new() -> Self {
        Self { payload: None, children: None, param: None, wildcard: None }
    }

    fn child(&self, segment: &str) -> Option<&Node<T>> {
        self.children.as_ref()?.get(segment)
    }

    /// The node `segments` leads to, without creating anything.
    fn find(&self, segments: &[Segment]) -> Option<&Node<T>> {
        let mut node = self;
        for segment in segments {
            node = match segment {
                Segment::Literal(name) => node.child(name)?,
                Segment::Param(_) => &*node.param.as_ref()?.node,
                Segment::Wildcard => node.wildcard.as_deref()?,
            };
        }
        Some(node)
    }

    fn descend(&mut self, segment: &Segment) -> &mut Node<T> {
        match segment {
            Segment::Literal(name) => self
                .children
                .get_or_insert_with(HashMap::new)
                .entry(name.clone())
                .or_insert_with(Node::new),
            Segment::Param(name) => {
                let param = self.param.get_or_insert_with(|| ParamChild {
                    name: name.clone(),
                    node: Box::new(Node::new()),
                });
                // One parameter branch per node: the latest registration names it.
                param.name.clone_from(name);
                &mut *param.node
            }
            Segment::Wildcard => &mut **self.wildcard.get_or_insert_with(|| Box::new(Node::new())),
        }
    }
}

/// The compiled route table.
///
/// Build it once at startup (or through [`RoutingBuilder`](crate::RoutingBuilder));
/// it is read-only afterwards and safe to share between threads.
pub struct RouteTree<T> {
    trees: HashMap<Method, Node<T>>,
    len: usize,
}

impl<T> RouteTree<T> {
    pub fn new() -> Self {
        Self { trees: HashMap::new(), len: 0 }
    }

    /// Binds `payload` to `method` + `pattern`.
    ///
    /// Fails if the pattern is malformed or if the same method and pattern
    /// shape is already bound. Parameter names do not distinguish shapes:
    /// `/users/:id` and `/users/:name` occupy the same slot.
    pub fn insert(&mut self, method: Method, pattern: &str, payload: T) -> Result<(), RouteError> {
        let pattern = Pattern::parse(pattern)?;
        self.insert_pattern(method, &pattern, payload)
    }

    pub fn insert_pattern(
        &mut self,
        method: Method,
        pattern: &Pattern,
        payload: T,
    ) -> Result<(), RouteError> {
        // Checked before descending: a rejected insert must not rename
        // parameter branches or leave new nodes behind.
        let bound = self
            .trees
            .get(&method)
            .and_then(|root| root.find(pattern.segments()))
            .is_some_and(|node| node.payload.is_some());
        if bound {
            return Err(RouteError::DuplicateRoute {
                method,
                pattern: pattern.as_str().to_owned(),
            });
        }

        let mut node = self.trees.entry(method).or_insert_with(Node::new);
        for segment in pattern.segments() {
            node = node.descend(segment);
        }
        node.payload = Some(payload);
        self.len += 1;

        debug!(%method, %pattern, "route registered");
        Ok(())
    }

    /// Finds the payload for `method` + `path`, or `None` for a miss.
    pub fn lookup(&self, method: Method, path: &str) -> Option<RouteMatch<'_, T>> {
        let mut node = self.trees.get(&method)?;
        let segs = segments(path);
        let mut params = HashMap::new();
        let mut wildcard = Vec::new();

        for (i, seg) in segs.iter().enumerate() {
            if let Some(child) = node.child(seg) {
                node = child;
            } else if let Some(param) = &node.param {
                params.insert(param.name.clone(), (*seg).to_owned());
                node = &*param.node;
            } else if let Some(child) = node.wildcard.as_deref() {
                wildcard = segs[i..].iter().map(|s| (*s).to_owned()).collect();
                node = child;
                break;
            } else {
                return None;
            }
        }

        let payload = node.payload.as_ref()?;
        Some(RouteMatch { payload, params, wildcard })
    }

    /// Methods that have a route matching `path`.
    ///
    /// Empty means the path is unknown (404); non-empty but missing the
    /// request method means 405.
    pub fn allowed_methods(&self, path: &str) -> MethodSet {
        self.trees
            .keys()
            .copied()
            .filter(|m| self.lookup(*m, path).is_some())
            .collect()
    }

    /// Number of registered routes across all methods.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Default for RouteTree<T> {
    fn default() -> Self { Self::new() }
}
