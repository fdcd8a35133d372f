use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Request},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use crate::errors::AppError;

/// Header carrying the user id resolved by the upstream auth middleware
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller of a user-facing endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .ok_or(AppError::Unauthorized)?;

        Ok(AuthenticatedUser(user_id))
    }
}

/// Custom JSON extractor that provides better error messages
///
/// Deserialization failures, including amount validation done inside
/// `Amount`'s deserializer, come back as the standard JSON error body
/// instead of axum's plain-text rejection.
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ValidationJsonRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ValidatedJson(value)),
            Err(rejection) => Err(ValidationJsonRejection(rejection)),
        }
    }
}

pub struct ValidationJsonRejection(JsonRejection);

impl IntoResponse for ValidationJsonRejection {
    fn into_response(self) -> Response {
        let error_message = self.0.body_text();

        let (code, message) = if let Some(rest) = error_message.split("missing field `").nth(1) {
            let field = rest.split('`').next().unwrap_or("unknown");
            (
                "VALIDATION_MISSING_FIELD",
                format!("Missing required field: {}", field),
            )
        } else if let Some(detail) = error_message.split("Invalid amount:").nth(1) {
            let detail = detail.split(" at line").next().unwrap_or(detail).trim();
            ("VALIDATION_INVALID_AMOUNT", format!("Invalid amount: {}", detail))
        } else if matches!(self.0, JsonRejection::MissingJsonContentType(_)) {
            (
                "VALIDATION_INVALID_INPUT",
                "Expected Content-Type: application/json".to_string(),
            )
        } else {
            (
                "VALIDATION_INVALID_INPUT",
                "Invalid request body: failed to parse JSON".to_string(),
            )
        };

        tracing::warn!(
            error_code = code,
            error_message = %message,
            original_error = %error_message,
            "Request validation failed during JSON deserialization"
        );

        metrics::counter!("errors_total", "category" => "Validation", "code" => code).increment(1);

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
                "category": "Validation",
            }
        }));

        (StatusCode::BAD_REQUEST, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    async fn extract(request: HttpRequest<()>) -> Result<AuthenticatedUser, AppError> {
        let (mut parts, _) = request.into_parts();
        AuthenticatedUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_user_id_header_is_required() {
        let user_id = Uuid::new_v4();
        let request = HttpRequest::builder()
            .header(USER_ID_HEADER, user_id.to_string())
            .body(())
            .unwrap();
        assert_eq!(extract(request).await.unwrap(), AuthenticatedUser(user_id));

        let missing = HttpRequest::builder().body(()).unwrap();
        assert!(matches!(extract(missing).await, Err(AppError::Unauthorized)));

        let garbage = HttpRequest::builder()
            .header(USER_ID_HEADER, "not-a-uuid")
            .body(())
            .unwrap();
        assert!(matches!(extract(garbage).await, Err(AppError::Unauthorized)));
    }
}
