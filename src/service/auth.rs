use crate::auth::{interceptor::map_auth_err, AuthError, JwtManager, UserStore};
use crate::observability::metrics;
use crate::pb::{auth_service_server::AuthService, LoginRequest, LoginResponse};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// gRPC login endpoint issuing access tokens for stored users.
#[derive(Clone)]
pub struct AuthUserService {
    users: Arc<dyn UserStore>,
    jwt: Arc<JwtManager>,
}

impl AuthUserService {
    pub fn new(users: Arc<dyn UserStore>, jwt: Arc<JwtManager>) -> Self {
        Self { users, jwt }
    }
}

fn invalid_login() -> Status {
    Status::unauthenticated("invalid username or password")
}

#[tonic::async_trait]
impl AuthService for AuthUserService {
    #[tracing::instrument(skip(self, req), fields(method = "login"))]
    async fn login(&self, req: Request<LoginRequest>) -> Result<Response<LoginResponse>, Status> {
        let start_time = std::time::Instant::now();

        let result = async {
            let LoginRequest { username, password } = req.into_inner();

            let user = self
                .users
                .find_by_username(&username)
                .await
                .map_err(map_auth_err)?;
            let Some(user) = user else {
                tracing::info!(%username, "login for unknown user");
                return Err(invalid_login());
            };

            // bcrypt verification blocks.
            let (user, matches) = tokio::task::spawn_blocking(move || {
                let matches = user.is_correct_password(&password);
                (user, matches)
            })
            .await
            .map_err(|e| map_auth_err(AuthError::Internal(format!("password check failed: {e}"))))?;

            if !matches {
                tracing::info!(%username, "login with wrong password");
                return Err(invalid_login());
            }

            let access_token = self.jwt.generate(&user).map_err(map_auth_err)?;
            tracing::info!(
                %username,
                role = %user.role,
                expires_in_secs = self.jwt.token_duration().as_secs(),
                "user logged in"
            );
            Ok(Response::new(LoginResponse { access_token }))
        }
        .await;

        metrics::increment_login(if result.is_ok() { "success" } else { "failure" });
        metrics::record_grpc_call("login", result.is_ok(), start_time.elapsed().as_secs_f64());
        result
    }
}
