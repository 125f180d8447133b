use crate::state::AppState;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, StatusCode, header, request::Parts},
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tessera::session::cookie_value;
use tessera::{Session, SessionOutcome};
use tracing::warn;

/// The request's session, shared between the handler and the middleware that saves it.
#[derive(Clone)]
pub struct SessionHandle(Arc<Mutex<Session>>);

impl SessionHandle {
    fn new(session: Session) -> Self {
        Self(Arc::new(Mutex::new(session)))
    }

    pub fn read<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&*self.0.lock())
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut *self.0.lock())
    }

    fn snapshot(&self) -> Session {
        self.0.lock().clone()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for SessionHandle {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SessionHandle>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "session middleware not installed"))
    }
}

/// Extract the session id from every `Cookie` header on the request
fn session_cookie(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .find_map(|h| cookie_value(h, name))
        .map(str::to_string)
}

/// Session middleware
///
/// Opens the session before the handler runs and saves it afterwards,
/// appending whatever `Set-Cookie` the save produced.
pub async fn session_middleware(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let cookie = session_cookie(&request, &state.sessions.config().cookie_name);
    let session = state.sessions.open_session(cookie.as_deref()).await;

    let handle = SessionHandle::new(session);
    request.extensions_mut().insert(handle.clone());

    let mut response = next.run(request).await;

    let cookie = match state.sessions.save_session(&handle.snapshot()).await {
        SessionOutcome::Unchanged => return response,
        SessionOutcome::SetCookie(cookie) | SessionOutcome::ExpireCookie(cookie) => cookie,
    };

    match HeaderValue::from_str(&cookie.to_header_value()) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => warn!("Session cookie is not a valid header value: {}", e),
    }
    response
}
