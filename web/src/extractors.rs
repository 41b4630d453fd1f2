//! Custom Axum extractors.
//!
//! - [`AuthenticatedPrincipal`]: the principal set by the upstream gateway
//! - [`LastEventId`]: the client's resume point for SSE
//! - [`CorrelationId`]: extract or generate request correlation IDs
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(
//!     principal: AuthenticatedPrincipal,
//!     LastEventId(resume): LastEventId,
//!     correlation_id: CorrelationId,
//! ) -> Result<Response, AppError> {
//!     tracing::info!(principal = %principal.0.id, correlation_id = %correlation_id.0, ?resume);
//!     ...
//! }
//! ```

use crate::error::AppError;
use crate::middleware::CORRELATION_ID_HEADER;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, request::Parts},
};
use ticket_events_core::access::{Permissions, Principal, Role};
use uuid::Uuid;

/// Header carrying the authenticated principal id.
pub const PRINCIPAL_ID_HEADER: &str = "X-Principal-Id";

/// Header carrying the authenticated principal role.
pub const PRINCIPAL_ROLE_HEADER: &str = "X-Principal-Role";

/// Standard SSE resume header.
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// Query parameter fallback for clients that cannot set headers
/// (browser `EventSource` on first connect).
pub const LAST_EVENT_ID_PARAM: &str = "last_event_id";

/// Principal authenticated by the gateway in front of this service.
///
/// Read from `X-Principal-Id` and `X-Principal-Role`. Requests missing
/// either header, or with an unknown role, are rejected with 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPrincipal(pub Principal);

impl AuthenticatedPrincipal {
    /// Permissions carried by the principal.
    #[must_use]
    pub const fn permissions(&self) -> Permissions {
        self.0.permissions()
    }

    /// Unwrap the principal.
    #[must_use]
    pub fn into_inner(self) -> Principal {
        self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        principal_from_headers(&parts.headers).map(Self)
    }
}

/// Non-empty, trimmed header value.
fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn principal_from_headers(headers: &HeaderMap) -> Result<Principal, AppError> {
    let id = header_value(headers, PRINCIPAL_ID_HEADER)
        .ok_or_else(|| AppError::unauthorized("Missing principal"))?;
    let role: Role = header_value(headers, PRINCIPAL_ROLE_HEADER)
        .ok_or_else(|| AppError::unauthorized("Missing principal role"))?
        .parse()
        .map_err(|e| AppError::unauthorized("Unknown principal role").with_source(e))?;

    Ok(Principal::new(id, role))
}

/// The last event id the client processed, if it sent one.
///
/// The `Last-Event-ID` header wins over the `last_event_id` query parameter.
/// The value is passed through unparsed; an id the log does not know is
/// handled by the session's resume policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastEventId(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for LastEventId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = header_value(&parts.headers, LAST_EVENT_ID_HEADER).map(str::to_string);

        Ok(Self(from_header.or_else(|| {
            parts.uri.query().and_then(last_event_id_from_query)
        })))
    }
}

fn last_event_id_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == LAST_EVENT_ID_PARAM)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Correlation ID for request tracing.
///
/// Extracts the correlation ID from the `X-Correlation-ID` header,
/// or generates a new UUID v4 if not present.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // The middleware may already have settled on one
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        let correlation_id = parts
            .headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).expect("Valid request").into_parts().0
    }

    #[tokio::test]
    async fn test_principal_from_headers() {
        let mut parts = parts(
            Request::builder()
                .header(PRINCIPAL_ID_HEADER, "agent-42")
                .header(PRINCIPAL_ROLE_HEADER, "Agent"),
        );

        let principal = AuthenticatedPrincipal::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(principal.0, Principal::new("agent-42", Role::Agent));
        assert!(principal.permissions().internal);
    }

    #[tokio::test]
    async fn test_missing_principal_is_unauthorized() {
        let mut parts = parts(Request::builder().header(PRINCIPAL_ROLE_HEADER, "customer"));

        let err = AuthenticatedPrincipal::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_role_is_unauthorized() {
        let mut parts = parts(
            Request::builder()
                .header(PRINCIPAL_ID_HEADER, "u-1")
                .header(PRINCIPAL_ROLE_HEADER, "superuser"),
        );

        let err = AuthenticatedPrincipal::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();

        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_last_event_id_header_wins_over_query() {
        let mut parts = parts(
            Request::builder()
                .uri("/api/events/stream?last_event_id=from-query")
                .header(LAST_EVENT_ID_HEADER, "from-header"),
        );

        let LastEventId(id) = LastEventId::from_request_parts(&mut parts, &())
            .await
            .unwrap();

        assert_eq!(id.as_deref(), Some("from-header"));
    }

    #[tokio::test]
    async fn test_last_event_id_from_query() {
        let mut parts = parts(Request::builder().uri("/api/events/stream?foo=1&last_event_id=abc"));

        let LastEventId(id) = LastEventId::from_request_parts(&mut parts, &())
            .await
            .unwrap();

        assert_eq!(id.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_last_event_id_absent() {
        let mut parts = parts(Request::builder().uri("/api/events/stream?last_event_id="));

        let LastEventId(id) = LastEventId::from_request_parts(&mut parts, &())
            .await
            .unwrap();

        assert_eq!(id, None);
    }

    #[tokio::test]
    async fn test_correlation_id_from_header() {
        let uuid = Uuid::new_v4();
        let mut parts = parts(Request::builder().header(CORRELATION_ID_HEADER, uuid.to_string()));

        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(correlation_id.0, uuid);
    }

    #[tokio::test]
    async fn test_correlation_id_generates_new() {
        let mut parts = parts(Request::builder());

        let correlation_id = CorrelationId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_ne!(correlation_id.0, Uuid::nil());
    }
}
