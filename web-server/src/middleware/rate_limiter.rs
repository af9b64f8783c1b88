// web-server/src/middleware/rate_limiter.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Instant, Duration};
use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header,
    Error, ResponseError,
    HttpResponse
};
use futures_util::future::{LocalBoxFuture, Ready, ready};
use std::fmt;

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

// Custom error for rate limiting
#[derive(Debug)]
struct RateLimitExceeded;

impl fmt::Display for RateLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rate limit exceeded")
    }
}

impl ResponseError for RateLimitExceeded {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::TooManyRequests()
            .append_header((header::RETRY_AFTER, "60"))
            .body("Rate limit exceeded. Please try again later.")
    }
}

#[derive(Debug)]
struct HitStore {
    clients: HashMap<String, Vec<Instant>>,
    last_sweep: Instant,
}

impl HitStore {
    // Forget clients with no hits inside the window
    fn sweep(&mut self, now: Instant) {
        self.clients.retain(|_, hits| {
            hits.retain(|time| now.duration_since(*time) < RATE_LIMIT_WINDOW);
            !hits.is_empty()
        });
        self.last_sweep = now;
    }
}

/// Sliding-window request limiter per client IP for a set of path prefixes
#[derive(Debug, Clone)]
pub struct RateLimiter {
    paths: Vec<String>,
    max_requests: usize,
    trust_forwarded_for: bool,
    store: Arc<Mutex<HitStore>>,
}

impl RateLimiter {
    pub fn new(paths: Vec<String>, max_requests: usize) -> Self {
        Self {
            paths,
            max_requests,
            trust_forwarded_for: false,
            store: Arc::new(Mutex::new(HitStore {
                clients: HashMap::new(),
                last_sweep: Instant::now(),
            })),
        }
    }

    /// Key clients by `X-Forwarded-For`/`Forwarded`. Only safe behind a proxy
    /// that overwrites those headers.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    fn client_key(&self, req: &ServiceRequest) -> String {
        if self.trust_forwarded_for {
            if let Some(ip) = req.connection_info().realip_remote_addr() {
                return ip.to_string();
            }
        }
        req.peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn is_rate_limited(&self, ip: &str) -> bool {
        self.is_rate_limited_at(ip, Instant::now())
    }

    fn is_rate_limited_at(&self, ip: &str, now: Instant) -> bool {
        let mut store = self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if now.duration_since(store.last_sweep) >= RATE_LIMIT_WINDOW {
            store.sweep(now);
        }

        let hits = store.clients.entry(ip.to_string()).or_default();
        hits.retain(|time| now.duration_since(*time) < RATE_LIMIT_WINDOW);

        if hits.len() >= self.max_requests {
            true
        } else {
            hits.push(now);
            false
        }
    }

    fn tracked_clients(&self) -> usize {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clients.len()
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimiter
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RateLimiterMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimiterMiddleware {
            service,
            limiter: self.clone(),
        }))
    }
}

pub struct RateLimiterMiddleware<S> {
    service: S,
    limiter: RateLimiter,
}

impl<S, B> Service<ServiceRequest> for RateLimiterMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<ServiceResponse<B>, Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let path = req.path().to_string();
        let should_rate_limit = self.limiter.paths.iter().any(|p| path.starts_with(p));

        if should_rate_limit {
            let ip = self.limiter.client_key(&req);

            if self.limiter.is_rate_limited(&ip) {
                tracing::warn!("Rate limit exceeded for IP: {}", ip);
                return Box::pin(async {
                    Err(RateLimitExceeded.into())
                });
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            fut.await
        })
    }
}
