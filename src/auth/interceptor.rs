//! Server-side authorization.
//!
//! `AuthLayer` sits in front of the tonic router, so the same policy runs for
//! unary and streaming calls before any request message is decoded. The policy
//! is keyed by the full gRPC method path (`/package.Service/Method`).

use crate::auth::{metadata_token, AuthError, JwtManager, UserClaims};
use crate::observability::metrics;
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::task::{Context, Poll};
use tonic::body::BoxBody;
use tonic::metadata::MetadataMap;
use tonic::Status;
use tower::{Layer, Service};

const LAPTOP_SERVICE_PATH: &str = "/pcbook.LaptopService";

/// Roles allowed to call each protected method. Methods absent from the map are public.
pub fn accessible_roles() -> HashMap<String, HashSet<String>> {
    let roles = |names: &[&str]| names.iter().map(|r| r.to_string()).collect::<HashSet<_>>();
    HashMap::from([
        (format!("{LAPTOP_SERVICE_PATH}/CreateLaptop"), roles(&["admin"])),
        (format!("{LAPTOP_SERVICE_PATH}/UploadImage"), roles(&["admin"])),
        (format!("{LAPTOP_SERVICE_PATH}/RateLaptop"), roles(&["admin", "user"])),
    ])
}

#[derive(Debug, Clone)]
pub struct AuthInterceptor {
    jwt: Arc<JwtManager>,
    accessible_roles: HashMap<String, HashSet<String>>,
}

impl AuthInterceptor {
    pub fn new(jwt: Arc<JwtManager>, accessible_roles: HashMap<String, HashSet<String>>) -> Self {
        Self {
            jwt,
            accessible_roles,
        }
    }

    /// An interceptor that treats every method as public.
    pub fn allow_all(jwt: Arc<JwtManager>) -> Self {
        Self::new(jwt, HashMap::new())
    }

    /// Decides whether a call to `method` carrying `metadata` may proceed.
    ///
    /// Returns the verified claims for protected methods and `None` for public ones.
    pub fn authorize(
        &self,
        method: &str,
        metadata: &MetadataMap,
    ) -> Result<Option<UserClaims>, AuthError> {
        let Some(roles) = self.accessible_roles.get(method) else {
            return Ok(None);
        };

        let token = metadata_token(metadata).ok_or(AuthError::MissingToken)?;
        let claims = self.jwt.verify(&token)?;

        if !roles.contains(&claims.role) {
            return Err(AuthError::PermissionDenied(method.to_string()));
        }
        Ok(Some(claims))
    }
}

pub(crate) fn map_auth_err(e: AuthError) -> Status {
    match e {
        AuthError::MissingToken | AuthError::InvalidToken(_) => {
            Status::unauthenticated(e.to_string())
        }
        AuthError::PermissionDenied(_) => Status::permission_denied(e.to_string()),
        AuthError::UserExists(_) => Status::already_exists(e.to_string()),
        AuthError::Internal(m) => Status::internal(m),
    }
}

#[derive(Debug, Clone)]
pub struct AuthLayer {
    interceptor: Arc<AuthInterceptor>,
}

impl AuthLayer {
    pub fn new(interceptor: Arc<AuthInterceptor>) -> Self {
        Self { interceptor }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            interceptor: self.interceptor.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    interceptor: Arc<AuthInterceptor>,
}

impl<S, ReqBody> Service<http::Request<ReqBody>> for AuthMiddleware<S>
where
    S: Service<http::Request<ReqBody>, Response = http::Response<BoxBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<ReqBody>) -> Self::Future {
        let method = req.uri().path().to_string();
        let metadata = MetadataMap::from_headers(req.headers().clone());

        match self.interceptor.authorize(&method, &metadata) {
            Ok(claims) => {
                if let Some(claims) = claims {
                    tracing::debug!(
                        %method,
                        username = %claims.username,
                        role = %claims.role,
                        "call authorized"
                    );
                    metrics::increment_auth_success(&method);
                    req.extensions_mut().insert(claims);
                }
                Box::pin(self.inner.call(req))
            }
            Err(e) => {
                let status = map_auth_err(e);
                tracing::warn!(
                    %method,
                    code = ?status.code(),
                    reason = %status.message(),
                    "call rejected"
                );
                metrics::increment_auth_failure(&method, code_label(status.code()));
                Box::pin(async move { Ok(status.into_http()) })
            }
        }
    }
}

fn code_label(code: tonic::Code) -> &'static str {
    match code {
        tonic::Code::Unauthenticated => "unauthenticated",
        tonic::Code::PermissionDenied => "permission_denied",
        _ => "error",
    }
}
