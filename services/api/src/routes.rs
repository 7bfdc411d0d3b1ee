//! API service routes

use auth::models::{NewPermission, NewRole, NewUser, Session, UpdatePermission, UpdateRole, UpdateUser};
use auth::{ActivityFilter, AdminCommand};
use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::ApiResult,
    middleware::session_middleware,
    models::{
        ActivityQuery, CreateRoleRequest, CurrentSessionResponse, LoginRequest, LoginResponse,
        LogoutRequest, RolePermissionsRequest, SessionResponse, SetParentRequest, SignupRequest,
        VerifyMfaRequest,
    },
    state::AppState,
};

/// Create the router for the API service
pub fn create_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/auth/session", get(current_session))
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/users/:id/permissions", get(user_permissions))
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/hierarchy", get(role_hierarchy))
        .route(
            "/roles/:id",
            get(get_role).put(update_role).delete(delete_role),
        )
        .route("/roles/:id/parent", put(set_role_parent))
        .route("/roles/:id/permissions", put(set_role_permissions))
        .route("/roles/:id/clone", post(clone_role))
        .route("/permissions", get(list_permissions).post(create_permission))
        .route("/permissions/categories", get(permissions_by_category))
        .route(
            "/permissions/:id",
            get(get_permission)
                .put(update_permission)
                .delete(delete_permission),
        )
        .route("/activity", get(list_activity))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/mfa/verify", post(verify_mfa))
        .route("/auth/logout", post(logout))
        .merge(protected_routes)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "api-service"
    }))
}

pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state
        .core
        .auth()
        .register(&payload.email, &payload.name, &payload.password)
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

/// User login endpoint
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    info!("Login attempt");
    let outcome = state
        .core
        .auth()
        .login(&payload.email, &payload.password)
        .await?;

    Ok(Json(outcome.into()))
}

pub async fn verify_mfa(
    State(state): State<AppState>,
    Json(payload): Json<VerifyMfaRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let signed_in = state
        .core
        .auth()
        .verify_mfa(&payload.challenge_id, &payload.code)
        .await?;

    Ok(Json(signed_in.into()))
}

/// Logout endpoint; succeeds whether or not the session existed
pub async fn logout(
    State(state): State<AppState>,
    Json(payload): Json<LogoutRequest>,
) -> impl IntoResponse {
    state.core.auth().logout(&payload.session_id).await;
    Json(json!({ "ok": true }))
}

pub async fn current_session(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> ApiResult<Json<CurrentSessionResponse>> {
    let user = state.core.store().get_user(session.user_id).await?;
    Ok(Json(CurrentSessionResponse { session, user }))
}

pub async fn list_users(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.core.store().list_users().await)
}

pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<NewUser>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.core.execute(AdminCommand::CreateUser(payload)).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.core.store().get_user(id).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<UpdateUser>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .core
        .execute(AdminCommand::UpdateUser { id, changes })
        .await?;
    Ok(Json(outcome))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.core.execute(AdminCommand::DeleteUser { id }).await?))
}

/// Effective permission ids of a user across all their roles
pub async fn user_permissions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.core.store().user_effective_permissions(id).await?))
}

pub async fn list_roles(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.core.store().list_roles().await)
}

pub async fn create_role(
    State(state): State<AppState>,
    Json(payload): Json<CreateRoleRequest>,
) -> ApiResult<impl IntoResponse> {
    let permissions = state
        .core
        .store()
        .resolve_permissions(&payload.permissions)
        .await?;
    let new_role = NewRole {
        name: payload.name,
        description: payload.description,
        permissions,
        inherits_from: payload.inherits_from,
        is_active: payload.is_active,
    };

    let outcome = state.core.execute(AdminCommand::CreateRole(new_role)).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn get_role(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.core.store().get_role(id).await?))
}

pub async fn update_role(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<UpdateRole>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .core
        .execute(AdminCommand::UpdateRole { id, changes })
        .await?;
    Ok(Json(outcome))
}

pub async fn delete_role(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.core.execute(AdminCommand::DeleteRole { id }).await?))
}

pub async fn set_role_parent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetParentRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .core
        .execute(AdminCommand::SetInheritance {
            role_id: id,
            parent_id: payload.parent_id,
        })
        .await?;
    Ok(Json(outcome))
}

pub async fn set_role_permissions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RolePermissionsRequest>,
) -> ApiResult<impl IntoResponse> {
    let permission_ids = state
        .core
        .store()
        .resolve_permissions(&payload.permissions)
        .await?;
    let outcome = state
        .core
        .execute(AdminCommand::AssignPermissions {
            role_id: id,
            permission_ids,
        })
        .await?;
    Ok(Json(outcome))
}

pub async fn clone_role(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.core.execute(AdminCommand::CloneRole { id }).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn role_hierarchy(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.core.store().role_hierarchy().await)
}

pub async fn list_permissions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.core.store().list_permissions().await)
}

pub async fn permissions_by_category(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.core.store().permissions_by_category().await)
}

pub async fn create_permission(
    State(state): State<AppState>,
    Json(payload): Json<NewPermission>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .core
        .execute(AdminCommand::CreatePermission(payload))
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub async fn get_permission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.core.store().get_permission(id).await?))
}

pub async fn update_permission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<UpdatePermission>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state
        .core
        .execute(AdminCommand::UpdatePermission { id, changes })
        .await?;
    Ok(Json(outcome))
}

pub async fn delete_permission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .core
            .execute(AdminCommand::DeletePermission { id })
            .await?,
    ))
}

pub async fn list_activity(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> impl IntoResponse {
    let filter = ActivityFilter {
        user_id: query.user_id,
        kind: query.kind,
        since: query.since,
        until: query.until,
    };
    let page = state
        .core
        .activity()
        .query(&filter, query.page.unwrap_or(1), query.limit.unwrap_or(0))
        .await;
    Json(page)
}
