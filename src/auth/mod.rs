//! PSK-based authentication and role gating.
//!
//! Implements constant-time comparison to mitigate timing attacks. The
//! matching key decides the caller's role; handlers check the role before
//! touching the registry.

use axum::{
    extract::Request,
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::errors::AppError;

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header carrying the operator's display name, recorded as `enrolledBy`.
pub const USER_NAME_HEADER: &str = "x-user-name";

/// What an authenticated caller may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Enroll, edit, delete, read and poll
    Admin,
    /// Read and poll only
    User,
}

/// Identity attached to every authenticated request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub username: String,
    pub role: Role,
}

impl Caller {
    pub fn require_admin(&self) -> Result<(), AppError> {
        match self.role {
            Role::Admin => Ok(()),
            Role::User => Err(AppError::Forbidden(
                "This operation requires the admin role".to_string(),
            )),
        }
    }
}

/// Configured pre-shared keys.
#[derive(Debug, Clone, Default)]
pub struct AuthKeys {
    pub admin: Option<String>,
    pub user: Option<String>,
}

impl AuthKeys {
    /// With no keys configured every caller is an admin (dev mode).
    pub fn disabled(&self) -> bool {
        self.admin.is_none() && self.user.is_none()
    }

    /// Resolve the role granted by `provided`, if any.
    pub fn role_for(&self, provided: &str) -> Option<Role> {
        let is_admin = self
            .admin
            .as_deref()
            .is_some_and(|k| constant_time_compare(provided, k));
        let is_user = self
            .user
            .as_deref()
            .is_some_and(|k| constant_time_compare(provided, k));

        if is_admin {
            Some(Role::Admin)
        } else if is_user {
            Some(Role::User)
        } else {
            None
        }
    }
}

/// PSK authentication layer function that takes the configured keys as a parameter.
pub async fn psk_auth_layer(keys: AuthKeys, mut request: Request, next: Next) -> Response {
    let username = request
        .headers()
        .get(USER_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string();

    // If no PSK is configured, allow all requests (dev mode)
    if keys.disabled() {
        request.extensions_mut().insert(Caller {
            username,
            role: Role::Admin,
        });
        return next.run(request).await;
    }

    // API key header first, then Authorization bearer token
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            request
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        })
        .map(|s| s.to_string());

    let Some(provided) = provided else {
        return AppError::Unauthorized("Missing API key".to_string()).into_response();
    };

    match keys.role_for(&provided) {
        Some(role) => {
            request.extensions_mut().insert(Caller { username, role });
            next.run(request).await
        }
        None => AppError::Unauthorized("Invalid API key".to_string()).into_response(),
    }
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    // Constant-time comparison
    a_bytes.ct_eq(b_bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Extension, Router};
    use tower::ServiceExt;

    #[test]
    fn test_constant_time_compare_equal() {
        assert!(constant_time_compare("test-key-123", "test-key-123"));
    }

    #[test]
    fn test_constant_time_compare_not_equal() {
        assert!(!constant_time_compare("test-key-123", "test-key-124"));
    }

    #[test]
    fn test_constant_time_compare_different_lengths() {
        assert!(!constant_time_compare("short", "much-longer-key"));
    }

    #[test]
    fn test_role_for_keys() {
        let keys = AuthKeys {
            admin: Some("admin-key".to_string()),
            user: Some("user-key".to_string()),
        };
        assert_eq!(keys.role_for("admin-key"), Some(Role::Admin));
        assert_eq!(keys.role_for("user-key"), Some(Role::User));
        assert_eq!(keys.role_for("other"), None);
        assert!(!keys.disabled());
        assert!(AuthKeys::default().disabled());
    }

    #[test]
    fn test_user_role_is_not_admin() {
        let caller = Caller {
            username: "bob".to_string(),
            role: Role::User,
        };
        assert!(matches!(caller.require_admin(), Err(AppError::Forbidden(_))));
    }

    fn whoami_router(keys: AuthKeys) -> Router {
        async fn whoami(Extension(caller): Extension<Caller>) -> String {
            format!("{}:{:?}", caller.username, caller.role)
        }

        Router::new()
            .route("/whoami", get(whoami))
            .layer(middleware::from_fn(move |req, next| {
                psk_auth_layer(keys.clone(), req, next)
            }))
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_layer_attaches_caller() {
        let keys = AuthKeys {
            admin: Some("admin-key".to_string()),
            user: Some("user-key".to_string()),
        };

        let request = Request::builder()
            .uri("/whoami")
            .header(header::AUTHORIZATION, "Bearer user-key")
            .header(USER_NAME_HEADER, "carol")
            .body(Body::empty())
            .unwrap();
        let response = whoami_router(keys.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "carol:User");

        let request = Request::builder()
            .uri("/whoami")
            .header(API_KEY_HEADER, "nope")
            .body(Body::empty())
            .unwrap();
        let response = whoami_router(keys).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_dev_mode_grants_admin() {
        let request = Request::builder()
            .uri("/whoami")
            .body(Body::empty())
            .unwrap();
        let response = whoami_router(AuthKeys::default())
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(body_text(response).await, "unknown:Admin");
    }
}
