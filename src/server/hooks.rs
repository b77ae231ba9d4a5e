//! Observation points a [`Handler`](crate::Handler) can opt into without
//! changing the connection loop itself.
//!
//! Every method has a logging no-op default, so implementing [`Hooks`] is
//! optional; [`Server`](crate::Server) calls through `&self` if the handler
//! also implements it, or the default no-op otherwise.

use crate::{http::types::Method, Request};

/// Lifecycle callbacks for a connection's requests.
///
/// Implement alongside [`Handler`](crate::Handler) to observe body chunks,
/// rejected requests, and route outcomes without threading extra state
/// through the handler itself.
pub trait Hooks: Send + Sync {
    /// Called once per chunk when [`Bufferization::None`
    /// ](crate::limits::Bufferization::None) is configured, instead of
    /// buffering the body into [`Request::body`].
    fn on_body_chunk(&self, chunk: &[u8]) {
        log::trace!("body chunk: {} bytes", chunk.len());
    }

    /// Called when a request is rejected before a handler ever sees it
    /// (malformed input, a limit exceeded, a timeout). `reason` is a short,
    /// human-readable description of why.
    fn on_rejected(&self, method: Option<Method>, reason: &str) {
        let method = method.map_or("?", Method::as_str);
        log::debug!("rejected request ({method}): {reason}");
    }

    /// Called after a request is fully parsed and before the handler runs.
    fn on_accepted(&self, req: &Request) {
        log::trace!(
            "accepted {} {}",
            req.method().as_str(),
            String::from_utf8_lossy(req.url().path())
        );
    }
}

/// The default [`Hooks`] implementation: logs at `trace`/`debug` and nothing else.
pub struct NoopHooks;

impl Hooks for NoopHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting;
    impl Hooks for Counting {
        fn on_body_chunk(&self, chunk: &[u8]) {
            assert_eq!(chunk, b"abc");
        }
    }

    #[test]
    fn custom_hook_runs_instead_of_default() {
        Counting.on_body_chunk(b"abc");
    }

    #[test]
    fn noop_hooks_do_not_panic() {
        NoopHooks.on_body_chunk(b"x");
        NoopHooks.on_rejected(Some(Method::Get), "invalid method");
    }
}
