//! User endpoints. Each request builds its own [`UsersHandler`], so every
//! request works against its own session.

use std::sync::Arc;

use axum::{extract::Extension, http::StatusCode, Json};
use scopedb_session::{Application, SessionError, SessionMixin, SessionProvider};
use serde::{Deserialize, Serialize};

use crate::api::ApiError;
use crate::models::User;
use crate::AppState;

/// Maximum length for a username.
const MAX_USERNAME_LEN: usize = 64;

/// Per-request handler instance.
pub struct UsersHandler {
    sessions: SessionProvider,
}

impl SessionMixin for UsersHandler {
    fn sessions(&self) -> &SessionProvider {
        &self.sessions
    }

    fn sessions_mut(&mut self) -> &mut SessionProvider {
        &mut self.sessions
    }
}

impl UsersHandler {
    pub fn new(application: Arc<Application>) -> Self {
        Self {
            sessions: SessionProvider::new(application),
        }
    }

    /// Blocking: counts users through the cached session and finishes the
    /// request. Must run on a worker thread.
    pub fn count_users(&mut self) -> Result<i64, SessionError> {
        let count = self.session()?.count::<User>()?;
        self.finish_request()?;
        Ok(count)
    }

    pub async fn list_users(self) -> Result<Vec<User>, SessionError> {
        let mut scope = self.async_make_session().await?;
        let users = scope.run(|s| s.all::<User>()).await;
        scope.finish(users).await
    }

    pub async fn create_user(self, username: String) -> Result<User, SessionError> {
        let mut scope = self.async_make_session().await?;
        let created = scope
            .run(move |s| -> Result<User, SessionError> {
                let mut user = User::new(username);
                user.id = Some(s.add(&user)?);
                Ok(user)
            })
            .await;
        scope.finish(created).await
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: i64,
}

/// GET /api/users/count
pub async fn count_users_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<CountResponse>, ApiError> {
    let application = Arc::clone(&state.application);
    let count = state
        .application
        .as_future(move || UsersHandler::new(application).count_users())
        .await??;

    Ok(Json(CountResponse { count }))
}

/// GET /api/users
pub async fn list_users_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = UsersHandler::new(Arc::clone(&state.application))
        .list_users()
        .await?;
    Ok(Json(users))
}

/// POST /api/users
pub async fn create_user_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let username = payload.username.trim().to_string();
    if username.is_empty() || username.len() > MAX_USERNAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "username must be 1-{} bytes",
            MAX_USERNAME_LEN
        )));
    }

    let user = UsersHandler::new(Arc::clone(&state.application))
        .create_user(username)
        .await?;

    tracing::info!(user_id = ?user.id, "created user");
    Ok((StatusCode::CREATED, Json(user)))
}
