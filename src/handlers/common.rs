use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::errors::ServiceError;

/// Identity of the caller, resolved by the upstream auth layer and forwarded
/// as the `x-user-id` header. This service trusts the header; authentication
/// itself lives outside it.
#[derive(Debug, Clone, Copy)]
pub struct ActorId(pub Uuid);

const ACTOR_HEADER: &str = "x-user-id";

#[async_trait]
impl<S> FromRequestParts<S> for ActorId
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ACTOR_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Forbidden(format!("missing {} header", ACTOR_HEADER))
            })?;

        Uuid::parse_str(raw).map(ActorId).map_err(|_| {
            ServiceError::Validation(format!("{} must be a valid UUID", ACTOR_HEADER))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn extracts_valid_actor() {
        let id = Uuid::new_v4();
        let request = Request::builder()
            .header(ACTOR_HEADER, id.to_string())
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let actor = ActorId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(actor.0, id);
    }

    #[tokio::test]
    async fn missing_header_is_forbidden() {
        let request = Request::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();

        let err = ActorId::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }

    #[tokio::test]
    async fn malformed_header_is_validation_error() {
        let request = Request::builder()
            .header(ACTOR_HEADER, "not-a-uuid")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let err = ActorId::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }
}
