//! Before/after filter tree.
//!
//! Filters are built into the same segment-tree shape as routes but with
//! opposite cardinality: a route lookup answers with at most one handler,
//! a filter lookup answers with every filter whose pattern covers the path.
//!
//! ```text
//! /api/*          auth      (High)     ─┐
//! /api/:version   audit     (Normal)    ├─ all three apply to GET /api/v2
//! /api/v2         metrics   (Low)      ─┘
//! ```
//!
//! The walk explores both the literal and the parameter branch at each level
//! and picks up wildcard filters on the way down. The collected filters are
//! returned split by [`FilterKind`], each list in descending [`Priority`].

use std::collections::HashMap;

use tracing::debug;

use crate::error::RouteError;
use crate::method::{Method, MethodSet};
use crate::path::{Pattern, Segment, segments};

/// Execution order of filters that apply to the same request. Higher runs first.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Priority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

/// Whether a filter runs before or after the route handler.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FilterKind {
    Before,
    After,
}

/// A filter registration, not yet validated.
///
/// ```rust
/// use trellis::{FilterDef, Method, MethodSet, Priority};
///
/// let def = FilterDef::before("require_login", "/admin/*", ())
///     .methods(MethodSet::only(Method::Get).with(Method::Post))
///     .priority(Priority::High);
/// ```
#[derive(Clone, Debug)]
pub struct FilterDef<H> {
    pub name: String,
    pub pattern: String,
    pub methods: MethodSet,
    pub priority: Priority,
    pub kind: FilterKind,
    pub handler: H,
}

impl<H> FilterDef<H> {
    pub fn new(kind: FilterKind, name: impl Into<String>, pattern: impl Into<String>, handler: H) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            methods: MethodSet::all(),
            priority: Priority::Normal,
            kind,
            handler,
        }
    }

    pub fn before(name: impl Into<String>, pattern: impl Into<String>, handler: H) -> Self {
        Self::new(FilterKind::Before, name, pattern, handler)
    }

    pub fn after(name: impl Into<String>, pattern: impl Into<String>, handler: H) -> Self {
        Self::new(FilterKind::After, name, pattern, handler)
    }

    pub fn methods(mut self, methods: MethodSet) -> Self {
        self.methods = methods;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// A compiled filter, as returned from [`FilterTree::lookup`].
#[derive(Debug)]
pub struct Filter<H> {
    name: String,
    pattern: Pattern,
    methods: MethodSet,
    priority: Priority,
    kind: FilterKind,
    handler: H,
}

impl<H> Filter<H> {
    pub fn name(&self) -> &str { &self.name }
    pub fn pattern(&self) -> &Pattern { &self.pattern }
    pub fn methods(&self) -> MethodSet { self.methods }
    pub fn priority(&self) -> Priority { self.priority }
    pub fn kind(&self) -> FilterKind { self.kind }
    pub fn handler(&self) -> &H { &self.handler }

    fn applies_to(&self, method: Method) -> bool {
        self.methods.contains(method)
    }
}

/// Filters that apply to one request, each list ordered by descending priority.
#[derive(Debug)]
pub struct FilterMatch<'a, H> {
    before: Vec<&'a Filter<H>>,
    after: Vec<&'a Filter<H>>,
}

impl<'a, H> FilterMatch<'a, H> {
    pub fn before_filters(&self) -> &[&'a Filter<H>] {
        &self.before
    }

    pub fn after_filters(&self) -> &[&'a Filter<H>] {
        &self.after
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }
}

struct Node<H> {
    /// Filters whose pattern ends exactly at this node.
    exact: Vec<Filter<H>>,
    /// Filters whose pattern is this node followed by `*`.
    wildcard: Vec<Filter<H>>,
    children: Option<HashMap<String, Node<H>>>,
    param: Option<Box<Node<H>>>,
}

impl<H> Node<H> {
    fn new() -> Self {
        Self { exact: Vec::new(), wildcard: Vec::new(), children: None, param: None }
    }

    fn collect<'a>(&'a self, segs: &[&str], method: Method, out: &mut Vec<&'a Filter<H>>) {
        let Some((head, rest)) = segs.split_first() else {
            out.extend(self.exact.iter().filter(|f| f.applies_to(method)));
            return;
        };

        // A trailing `*` covers any non-empty remainder of the path.
        out.extend(self.wildcard.iter().filter(|f| f.applies_to(method)));

        if let Some(child) = self.children.as_ref().and_then(|c| c.get(*head)) {
            child.collect(rest, method, out);
        }
        if let Some(param) = self.param.as_deref() {
            param.collect(rest, method, out);
        }
    }
}

/// The compiled filter table.
pub struct FilterTree<H> {
    root: Node<H>,
    len: usize,
}

impl<H> FilterTree<H> {
    pub fn new() -> Self {
        Self { root: Node::new(), len: 0 }
    }

    /// Adds a filter.
    ///
    /// Any number of filters may share a pattern. Registering the same name
    /// and kind twice on one pattern is a configuration error.
    pub fn insert(&mut self, def: FilterDef<H>) -> Result<(), RouteError> {
        let pattern = Pattern::parse(&def.pattern)?;

        let mut node = &mut self.root;
        for segment in pattern.segments() {
            node = match segment {
                Segment::Literal(name) => node
                    .children
                    .get_or_insert_with(HashMap::new)
                    .entry(name.clone())
                    .or_insert_with(Node::new),
                Segment::Param(_) => &mut **node.param.get_or_insert_with(|| Box::new(Node::new())),
                Segment::Wildcard => break,
            };
        }

        let slot = if pattern.has_wildcard() { &mut node.wildcard } else { &mut node.exact };
        if slot.iter().any(|f| f.name == def.name && f.kind == def.kind) {
            return Err(RouteError::DuplicateFilter { name: def.name, pattern: def.pattern });
        }

        debug!(
            name = %def.name,
            %pattern,
            kind = ?def.kind,
            priority = ?def.priority,
            methods = ?def.methods,
            "filter registered"
        );

        slot.push(Filter {
            name: def.name,
            pattern,
            methods: def.methods,
            priority: def.priority,
            kind: def.kind,
            handler: def.handler,
        });
        self.len += 1;
        Ok(())
    }

    /// Every filter that applies to `method` + `path`.
    pub fn lookup(&self, path: &str, method: Method) -> FilterMatch<'_, H> {
        let mut found = Vec::new();
        self.root.collect(&segments(path), method, &mut found);

        let (mut before, mut after): (Vec<_>, Vec<_>) =
            found.into_iter().partition(|f| f.kind == FilterKind::Before);
        // Stable: equal priorities keep traversal order.
        before.sort_by(|a, b| b.priority.cmp(&a.priority));
        after.sort_by(|a, b| b.priority.cmp(&a.priority));

        FilterMatch { before, after }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<H> Default for FilterTree<H> {
    fn default() -> Self { Self::new() }
}
