//! Middlewares addressed by route name.
//!
//! The registry is read on every request, so entries attached after the
//! transport started apply to the next request without rebuilding anything.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use arc_swap::ArcSwap;
use axum::extract::Request;
use axum::response::Response;
use futures_util::future::BoxFuture;
use tower::{Service, ServiceExt};

use crate::middleware::{handler, Handler, Middleware};

type Entries = HashMap<String, Arc<dyn Middleware>>;

/// Hot-swappable map of route name → middleware.
#[derive(Clone)]
pub struct NamedMiddlewares(Arc<ArcSwap<Entries>>);

impl NamedMiddlewares {
    pub fn new() -> Self {
        Self(Arc::new(ArcSwap::from_pointee(HashMap::new())))
    }

    pub fn replace(&self, entries: Entries) {
        self.0.store(Arc::new(entries));
    }

    pub fn attach(&self, route: &str, middleware: Arc<dyn Middleware>) {
        self.0.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(route.to_string(), Arc::clone(&middleware));
            next
        });
    }

    pub fn detach(&self, route: &str) {
        self.0.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(route);
            next
        });
    }

    pub fn get(&self, route: &str) -> Option<Arc<dyn Middleware>> {
        self.0.load().get(route).cloned()
    }

    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self.0.load().keys().cloned().collect();
        routes.sort();
        routes
    }

    /// Handler for `route` that consults the registry per request.
    pub fn route(&self, route: &str, inner: Handler) -> Handler {
        handler(NamedRoute {
            route: Arc::from(route),
            registry: self.clone(),
            inner,
        })
    }
}

impl Default for NamedMiddlewares {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct NamedRoute {
    route: Arc<str>,
    registry: NamedMiddlewares,
    inner: Handler,
}

impl Service<Request> for NamedRoute {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let inner = self.inner.clone();
        let svc = match self.registry.get(&self.route) {
            Some(middleware) => middleware.wrap(inner),
            None => inner,
        };
        Box::pin(svc.oneshot(req))
    }
}
