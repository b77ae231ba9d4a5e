//! Route template compilation and path matching.
//!
//! A [`RouteBase`] compiles `/api/users/:id` style templates once at startup
//! and matches incoming request paths against them in specificity order,
//! without allocating on the matching path. It does not dispatch requests
//! itself — pair the returned value with your own [`Handler`](crate::Handler)
//! dispatch logic.

use crate::http::types::Method;
use std::{cmp::Reverse, error, fmt};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Component {
    Static(Box<[u8]>),
    Named(Box<str>),
    Wildcard,
}

/// A compiled route template paired with an opaque value returned on match.
struct CompiledRoute<T> {
    method: Option<Method>,
    components: Vec<Component>,
    value: T,
}

/// A collection of compiled route templates, matched in order of specificity.
///
/// # Examples
/// ```
/// use pinion::{route::RouteBase, Method};
///
/// let mut routes = RouteBase::new();
/// routes.add(Some(Method::Get), "/users/:id", 1usize).unwrap();
/// routes.add(Some(Method::Get), "/users/:id/posts/*rest", 2usize).unwrap();
/// routes.add(None, "/health", 3usize).unwrap();
///
/// let segments: Vec<&[u8]> = vec![b"users", b"42"];
/// match routes.matched(Method::Get, &segments) {
///     pinion::route::MatchOutcome::Matched { value, params } => {
///         assert_eq!(*value, 1);
///         assert_eq!(params[0], ("id", b"42".as_slice()));
///     }
///     _ => panic!("expected a match"),
/// }
/// ```
pub struct RouteBase<T> {
    routes: Vec<CompiledRoute<T>>,
}

impl<T> Default for RouteBase<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RouteBase<T> {
    /// Creates an empty route table.
    #[inline]
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// Compiles `template` and registers it for `method` (or any method, if `None`).
    ///
    /// Templates are `/`-separated. A segment starting with `:` binds a named
    /// parameter (e.g. `:id`); a segment that is exactly `*` or starts with `*`
    /// must be last and matches one or more remaining segments as a single
    /// wildcard capture.
    ///
    /// # Errors
    /// Returns [`RouteError::EmptyTemplate`] for `""` or `"/"`, and
    /// [`RouteError::WildcardNotLast`] if `*` appears before the final segment.
    pub fn add(&mut self, method: Option<Method>, template: &str, value: T) -> Result<(), RouteError> {
        let components = compile(template)?;
        self.routes.push(CompiledRoute {
            method,
            components,
            value,
        });
        self.routes
            .sort_by(|a, b| specificity(&a.components).cmp(&specificity(&b.components)));

        Ok(())
    }

    /// Matches `path_segments` (as returned by [`Url::path_segments`
    /// ](crate::Url::path_segments)) against the registered templates.
    ///
    /// Iterates routes in specificity order (more static segments first,
    /// wildcard routes last) and returns the first match. If one or more
    /// templates match the path but none accept `method`, returns
    /// [`MatchOutcome::MethodNotAllowed`] listing the methods that would.
    pub fn matched<'a>(&'a self, method: Method, path_segments: &[&'a [u8]]) -> MatchOutcome<'a, T> {
        let mut allowed = Vec::new();

        for route in &self.routes {
            let Some(params) = match_components(&route.components, path_segments) else {
                continue;
            };

            match route.method {
                Some(m) if m == method => {
                    return MatchOutcome::Matched {
                        value: &route.value,
                        params,
                    }
                }
                Some(m) => allowed.push(m),
                None => {
                    return MatchOutcome::Matched {
                        value: &route.value,
                        params,
                    }
                }
            }
        }

        if allowed.is_empty() {
            MatchOutcome::NotFound
        } else {
            MatchOutcome::MethodNotAllowed(allowed)
        }
    }
}

/// Result of [`RouteBase::matched`].
#[derive(Debug)]
pub enum MatchOutcome<'a, T> {
    /// A route matched; `params` holds `(name, raw_value)` for each named segment,
    /// in template order. Values are not percent-decoded — use
    /// [`percent_decode`](crate::query::percent_decode) if needed.
    Matched {
        value: &'a T,
        params: Vec<(&'a str, &'a [u8])>,
    },
    /// No template's path shape matched.
    NotFound,
    /// One or more templates matched the path, but not for this method.
    MethodNotAllowed(Vec<Method>),
}

fn compile(template: &str) -> Result<Vec<Component>, RouteError> {
    let trimmed = template.trim_matches('/');
    if trimmed.is_empty() {
        return Err(RouteError::EmptyTemplate);
    }

    let raw_segments: Vec<&str> = trimmed.split('/').collect();
    let mut components = Vec::with_capacity(raw_segments.len());

    for (i, segment) in raw_segments.iter().enumerate() {
        let is_last = i + 1 == raw_segments.len();

        if let Some(rest) = segment.strip_prefix('*') {
            if !is_last {
                return Err(RouteError::WildcardNotLast);
            }
            let _ = rest; // the name after `*` is accepted but not bound separately
            components.push(Component::Wildcard);
        } else if let Some(name) = segment.strip_prefix(':') {
            if name.is_empty() {
                return Err(RouteError::EmptyParamName);
            }
            components.push(Component::Named(name.into()));
        } else {
            components.push(Component::Static(segment.as_bytes().into()));
        }
    }

    Ok(components)
}

fn match_components<'a>(
    components: &[Component],
    path: &[&'a [u8]],
) -> Option<Vec<(&'a str, &'a [u8])>> {
    let mut params = Vec::new();
    let mut path_iter = path.iter();

    for (i, component) in components.iter().enumerate() {
        match component {
            Component::Wildcard => {
                // Wildcard is always last; it must consume at least one segment.
                if i >= path.len() {
                    return None;
                }
                return Some(params);
            }
            Component::Static(literal) => {
                let segment = path_iter.next()?;
                if *segment != &literal[..] {
                    return None;
                }
            }
            Component::Named(name) => {
                let segment = path_iter.next()?;
                params.push((name.as_ref(), *segment));
            }
        }
    }

    // No trailing wildcard: path must be fully consumed.
    if path_iter.next().is_some() {
        None
    } else {
        Some(params)
    }
}

/// Ranks a template from most to least specific (lower sorts first).
///
/// Routes are ordered ascending by this key: non-wildcard templates sort
/// before wildcard ones, and among those, more static segments sort first
/// (ties broken by fewer named segments).
fn specificity(components: &[Component]) -> (bool, Reverse<usize>, usize) {
    let has_wildcard = components.iter().any(|c| matches!(c, Component::Wildcard));
    let static_count = components
        .iter()
        .filter(|c| matches!(c, Component::Static(_)))
        .count();
    let named_count = components
        .iter()
        .filter(|c| matches!(c, Component::Named(_)))
        .count();

    (has_wildcard, Reverse(static_count), named_count)
}

/// Errors returned while compiling a route template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// The template was empty (or only `/`).
    EmptyTemplate,
    /// A `*` wildcard segment appeared somewhere other than the last position.
    WildcardNotLast,
    /// A `:` named-parameter segment had no name after the colon.
    EmptyParamName,
}

impl error::Error for RouteError {}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::EmptyTemplate => write!(f, "route template is empty"),
            RouteError::WildcardNotLast => write!(f, "wildcard `*` segment must be last"),
            RouteError::EmptyParamName => write!(f, "named parameter `:` segment has no name"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_route_matches() {
        let mut routes = RouteBase::new();
        routes.add(Some(Method::Get), "/health", "ok").unwrap();

        let segments: Vec<&[u8]> = vec![b"health"];
        match routes.matched(Method::Get, &segments) {
            MatchOutcome::Matched { value, params } => {
                assert_eq!(*value, "ok");
                assert!(params.is_empty());
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn named_param_is_extracted() {
        let mut routes = RouteBase::new();
        routes.add(Some(Method::Get), "/users/:id", "user").unwrap();

        let segments: Vec<&[u8]> = vec![b"users", b"42"];
        match routes.matched(Method::Get, &segments) {
            MatchOutcome::Matched { params, .. } => {
                assert_eq!(params, vec![("id", b"42".as_slice())]);
            }
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn more_specific_route_wins() {
        let mut routes = RouteBase::new();
        routes.add(Some(Method::Get), "/users/:id", "dynamic").unwrap();
        routes.add(Some(Method::Get), "/users/me", "static").unwrap();

        let segments: Vec<&[u8]> = vec![b"users", b"me"];
        match routes.matched(Method::Get, &segments) {
            MatchOutcome::Matched { value, .. } => assert_eq!(*value, "static"),
            other => panic!("expected match, got {other:?}"),
        }
    }

    #[test]
    fn wildcard_matches_remaining_segments() {
        let mut routes = RouteBase::new();
        routes.add(Some(Method::Get), "/files/*path", "files").unwrap();

        let segments: Vec<&[u8]> = vec![b"files", b"a", b"b", b"c"];
        assert!(matches!(
            routes.matched(Method::Get, &segments),
            MatchOutcome::Matched { value: "files", .. }
        ));

        // Wildcard requires at least one trailing segment.
        let segments: Vec<&[u8]> = vec![b"files"];
        assert!(matches!(
            routes.matched(Method::Get, &segments),
            MatchOutcome::NotFound
        ));
    }

    #[test]
    fn method_not_allowed_when_path_matches_other_method() {
        let mut routes = RouteBase::new();
        routes.add(Some(Method::Post), "/users", "create").unwrap();

        let segments: Vec<&[u8]> = vec![b"users"];
        match routes.matched(Method::Get, &segments) {
            MatchOutcome::MethodNotAllowed(allowed) => assert_eq!(allowed, vec![Method::Post]),
            other => panic!("expected MethodNotAllowed, got {other:?}"),
        }
    }

    #[test]
    fn any_method_route_matches_everything() {
        let mut routes = RouteBase::new();
        routes.add(None, "/health", "ok").unwrap();

        let segments: Vec<&[u8]> = vec![b"health"];
        assert!(matches!(
            routes.matched(Method::Post, &segments),
            MatchOutcome::Matched { value: "ok", .. }
        ));
    }

    #[test]
    fn wildcard_before_last_segment_rejected() {
        assert_eq!(compile("/a/*rest/b"), Err(RouteError::WildcardNotLast));
    }

    #[test]
    fn empty_template_rejected() {
        assert_eq!(compile(""), Err(RouteError::EmptyTemplate));
        assert_eq!(compile("/"), Err(RouteError::EmptyTemplate));
    }
}
