//! Tower middleware that puts a [`Governor`] in front of a request path.
//!
//! For every call the service:
//! 1. resolves the request's endpoint (if any),
//! 2. waits up to `max_wait` for a slot (zero means gate only) and counts the request,
//! 3. calls the inner service,
//! 4. if the response says the server rate-limited us, freezes the key using
//!    the server's retry hint and the governor's
//!    [`FreezePolicy`](crate::config::FreezePolicy).

use crate::error::GovernorError;
use crate::governor::Governor;
use crate::role::Role;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower_layer::Layer;
use tower_service::Service;

/// A server-side rate-limit rejection seen in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RateLimited {
    /// The server's back-off hint (e.g. `Retry-After`), if it sent one.
    pub retry_after: Option<Duration>,
}

/// Recognises rate-limit rejections in responses.
pub trait ExhaustionSignal<Resp>: Send + Sync {
    fn rate_limited(&self, response: &Resp) -> Option<RateLimited>;
}

impl<Resp, F> ExhaustionSignal<Resp> for F
where
    F: Fn(&Resp) -> Option<RateLimited> + Send + Sync,
{
    fn rate_limited(&self, response: &Resp) -> Option<RateLimited> {
        self(response)
    }
}

/// Classifier that never reports a rejection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRateLimited;

impl<Resp> ExhaustionSignal<Resp> for NeverRateLimited {
    fn rate_limited(&self, _response: &Resp) -> Option<RateLimited> {
        None
    }
}

/// Picks the endpoint bucket for a request.
pub trait EndpointOf<Req>: Send + Sync {
    fn endpoint(&self, request: &Req) -> Option<String>;
}

impl<Req, F> EndpointOf<Req> for F
where
    F: Fn(&Req) -> Option<String> + Send + Sync,
{
    fn endpoint(&self, request: &Req) -> Option<String> {
        self(request)
    }
}

/// Every request goes to the role's default bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEndpoint;

impl<Req> EndpointOf<Req> for DefaultEndpoint {
    fn endpoint(&self, _request: &Req) -> Option<String> {
        None
    }
}

/// A layer that gates requests through a [`Governor`].
#[derive(Debug)]
pub struct GovernorLayer<C = NeverRateLimited, P = DefaultEndpoint> {
    governor: Governor,
    role: Role,
    max_wait: Duration,
    classifier: Arc<C>,
    endpoint_of: Arc<P>,
}

impl<C, P> Clone for GovernorLayer<C, P> {
    fn clone(&self) -> Self {
        Self {
            governor: self.governor.clone(),
            role: self.role,
            max_wait: self.max_wait,
            classifier: self.classifier.clone(),
            endpoint_of: self.endpoint_of.clone(),
        }
    }
}

impl GovernorLayer {
    /// Gate only (no waiting), default bucket, no rejection classification.
    pub fn new(governor: Governor, role: Role) -> Self {
        Self {
            governor,
            role,
            max_wait: Duration::ZERO,
            classifier: Arc::new(NeverRateLimited),
            endpoint_of: Arc::new(DefaultEndpoint),
        }
    }
}

impl<C, P> GovernorLayer<C, P> {
    /// Wait up to `max_wait` for a slot instead of failing fast.
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn classify_with<C2>(self, classifier: C2) -> GovernorLayer<C2, P> {
        GovernorLayer {
            governor: self.governor,
            role: self.role,
            max_wait: self.max_wait,
            classifier: Arc::new(classifier),
            endpoint_of: self.endpoint_of,
        }
    }

    pub fn endpoint_with<P2>(self, endpoint_of: P2) -> GovernorLayer<C, P2> {
        GovernorLayer {
            governor: self.governor,
            role: self.role,
            max_wait: self.max_wait,
            classifier: self.classifier,
            endpoint_of: Arc::new(endpoint_of),
        }
    }
}

impl<S, C, P> Layer<S> for GovernorLayer<C, P> {
    type Service = GovernorService<S, C, P>;

    fn layer(&self, service: S) -> Self::Service {
        GovernorService {
            inner: service,
            governor: self.governor.clone(),
            role: self.role,
            max_wait: self.max_wait,
            classifier: self.classifier.clone(),
            endpoint_of: self.endpoint_of.clone(),
        }
    }
}

/// Middleware service produced by [`GovernorLayer`].
#[derive(Debug)]
pub struct GovernorService<S, C = NeverRateLimited, P = DefaultEndpoint> {
    inner: S,
    governor: Governor,
    role: Role,
    max_wait: Duration,
    classifier: Arc<C>,
    endpoint_of: Arc<P>,
}

impl<S: Clone, C, P> Clone for GovernorService<S, C, P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            governor: self.governor.clone(),
            role: self.role,
            max_wait: self.max_wait,
            classifier: self.classifier.clone(),
            endpoint_of: self.endpoint_of.clone(),
        }
    }
}

impl<S, C, P, Req> Service<Req> for GovernorService<S, C, P>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    C: ExhaustionSignal<S::Response> + 'static,
    P: EndpointOf<Req> + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = GovernorError<S::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GovernorError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // Keep the instance that was driven to ready.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let governor = self.governor.clone();
        let classifier = self.classifier.clone();
        let role = self.role;
        let max_wait = self.max_wait;
        let endpoint = self.endpoint_of.endpoint(&req);

        Box::pin(async move {
            let endpoint = endpoint.as_deref();
            if let Err(err) = governor.acquire(role, endpoint, max_wait).await {
                tracing::debug!(role = %role, endpoint = ?endpoint, error = %err, "request held back by governor");
                return Err(err.widen());
            }

            let response = inner.call(req).await.map_err(GovernorError::Inner)?;

            if let Some(signal) = classifier.rate_limited(&response) {
                let applied = governor.report_rate_limited(role, endpoint, signal.retry_after);
                tracing::warn!(
                    role = %role,
                    endpoint = ?endpoint,
                    retry_after = ?signal.retry_after,
                    freeze = ?applied,
                    "server rate-limited request; freezing"
                );
            }
            Ok(response)
        })
    }
}
