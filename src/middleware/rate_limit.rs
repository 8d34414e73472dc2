use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

/// Fixed one-second window limiter, one per API surface. Coarse on purpose:
/// it shields the database from request storms, not from abusive clients.
#[derive(Clone, Debug)]
pub struct SurfaceLimiter {
    rps: u32,
    window: Arc<Mutex<Window>>,
}

#[derive(Debug)]
struct Window {
    opened: Instant,
    served: u32,
}

impl SurfaceLimiter {
    pub fn new(rps: u32) -> Self {
        Self {
            rps: rps.max(1),
            window: Arc::new(Mutex::new(Window {
                opened: Instant::now(),
                served: 0,
            })),
        }
    }

    fn try_admit(&self) -> bool {
        let mut guard = self.window.lock().expect("rate limiter mutex poisoned");
        let now = Instant::now();
        if now.duration_since(guard.opened) >= Duration::from_secs(1) {
            guard.opened = now;
            guard.served = 0;
        }
        if guard.served < self.rps {
            guard.served += 1;
            true
        } else {
            false
        }
    }
}

pub async fn rps_middleware(
    State(limiter): State<SurfaceLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.try_admit() {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("Retry-After", "1")],
            Json(json!({"error": "rate_limit_exceeded"})),
        )
            .into_response();
    }
    next.run(req).await
}
