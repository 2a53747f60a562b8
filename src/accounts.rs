//! Registration, login with lockout, account roles and status, admin checks.

use actix_web::web;
use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};

use crate::auth::{create_jwt, Auth, Role};
use crate::config::AdminAccount;
use crate::error::ApiError;
use crate::models::*;
use crate::repo::{Repo, RepoError};
use crate::require_role;
use crate::validation::{validate_email, validate_password, validate_username};

pub const MAX_FAILED_LOGINS: i32 = 5;
pub const LOCK_MINUTES: i64 = 10;

pub const INVALID_CREDENTIALS: &str = "Invalid credentials.";
pub const ACCOUNT_LOCKED: &str = "Account locked. Try again later.";
pub const ACCOUNT_SUSPENDED: &str = "Account suspended.";

pub async fn hash_password(password: String) -> Result<String, ApiError> {
    web::block(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
    })
    .await
    .map_err(|_| ApiError::Internal)?
    .map_err(|e| {
        tracing::error!(error = %e, "password hashing failed");
        ApiError::Internal
    })
}

pub async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    web::block(move || {
        let parsed = PasswordHash::new(&hash)?;
        Ok::<bool, argon2::password_hash::Error>(
            Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        )
    })
    .await
    .map_err(|_| ApiError::Internal)?
    .map_err(|e| {
        tracing::error!(error = %e, "stored password hash is unreadable");
        ApiError::Internal
    })
}

fn issue_token(user: &User) -> Result<AuthResponse, ApiError> {
    let token = create_jwt(user.id, &user.username, vec![user.role.clone()]).map_err(|e| {
        tracing::error!(error = %e, "token issue failed");
        ApiError::Internal
    })?;
    Ok(AuthResponse { token, user: PublicUser::from(user) })
}

async fn create_account(repo: &dyn Repo, email: &str, username: &str, password: String, profile: Profile) -> Result<User, ApiError> {
    let email = validate_email(email)?;
    let username = validate_username(username)?;
    validate_password(&password)?;

    let password_hash = hash_password(password).await?;
    let user = repo.create_user(NewUser { email, username, password_hash, profile }).await?;
    tracing::info!(user_id = user.id, username = %user.username, "account registered");
    Ok(user)
}

pub async fn register(repo: &dyn Repo, req: RegisterRequest) -> Result<AuthResponse, ApiError> {
    let profile = Profile {
        first_name: req.first_name.trim().to_string(),
        last_name: req.last_name.trim().to_string(),
        zip: req.zip.trim().to_string(),
        borough: req.borough.trim().to_string(),
        notify_on_replies: true,
    };
    let user = create_account(repo, &req.email, &req.username, req.password, profile).await?;
    issue_token(&user)
}

/// Make sure the configured admin exists and holds the admin role. An
/// existing account keeps its password.
pub async fn ensure_admin(repo: &dyn Repo, admin: &AdminAccount) -> Result<PublicUser, ApiError> {
    let user = match repo.find_user_by_identifier(admin.username.trim()).await {
        Ok(u) => u,
        Err(RepoError::NotFound) => {
            let profile = Profile { notify_on_replies: true, ..Profile::default() };
            create_account(repo, &admin.email, &admin.username, admin.password.clone(), profile).await?
        }
        Err(e) => return Err(e.into()),
    };
    let user = match user.role {
        Role::Admin => user,
        Role::User => repo.set_user_role(user.id, Role::Admin).await?,
    };
    let user = match user.status {
        AccountStatus::Active => user,
        AccountStatus::Suspended => repo.set_user_status(user.id, AccountStatus::Active).await?,
    };
    tracing::info!(user_id = user.id, username = %user.username, "admin account ready");
    Ok(PublicUser::from(&user))
}

/// Verify credentials. A locked account is refused before the password is
/// checked; each wrong password counts toward the lock.
pub async fn login(repo: &dyn Repo, req: LoginRequest) -> Result<AuthResponse, ApiError> {
    let identifier = req.identifier.trim();
    if identifier.is_empty() || req.password.is_empty() {
        return Err(ApiError::bad_request("Identifier and password are required."));
    }
    let user = match repo.find_user_by_identifier(identifier).await {
        Ok(u) => u,
        Err(RepoError::NotFound) => return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.into())),
        Err(e) => return Err(e.into()),
    };

    if user.status == AccountStatus::Suspended {
        tracing::info!(user_id = user.id, "login refused, account suspended");
        return Err(ApiError::Unauthorized(ACCOUNT_SUSPENDED.into()));
    }
    let now = Utc::now();
    if user.auth_meta.is_locked(now) {
        tracing::info!(user_id = user.id, "login refused, account locked");
        return Err(ApiError::Unauthorized(ACCOUNT_LOCKED.into()));
    }

    if !verify_password(req.password, user.password_hash.clone()).await? {
        let meta = repo
            .record_login_failure(user.id, MAX_FAILED_LOGINS, now + Duration::minutes(LOCK_MINUTES))
            .await?;
        if meta.locked_until.is_some() {
            tracing::warn!(user_id = user.id, failures = meta.failed_login_count, "account locked");
        }
        return Err(ApiError::Unauthorized(INVALID_CREDENTIALS.into()));
    }

    repo.record_login_success(user.id, now).await?;
    issue_token(&user)
}

pub async fn set_role(repo: &dyn Repo, user_id: Id, role: &str) -> Result<PublicUser, ApiError> {
    let role = Role::parse(role).ok_or_else(|| ApiError::bad_request("role must be user or admin."))?;
    let user = repo.set_user_role(user_id, role).await?;
    tracing::info!(user_id, role = user.role.as_str(), "role changed");
    Ok(PublicUser::from(&user))
}

pub async fn set_status(repo: &dyn Repo, user_id: Id, status: &str) -> Result<PublicUser, ApiError> {
    let status: AccountStatus = status
        .parse()
        .map_err(|_| ApiError::bad_request("status must be active or suspended."))?;
    let user = repo.set_user_status(user_id, status).await?;
    tracing::info!(user_id, status = status.as_str(), "account status changed");
    Ok(PublicUser::from(&user))
}

/// Admin rights come from the token and are confirmed against the stored
/// account, so a demotion or suspension applies to tokens already issued.
/// Returns the admin's id.
pub async fn require_admin(repo: &dyn Repo, auth: &Auth) -> Result<Id, ApiError> {
    require_role!(auth, Role::Admin);
    let id = auth.user_id()?;
    let user = match repo.get_user(id).await {
        Ok(u) => u,
        Err(RepoError::NotFound) => return Err(ApiError::Unauthorized("Account no longer exists.".into())),
        Err(e) => return Err(e.into()),
    };
    if user.role != Role::Admin || user.status != AccountStatus::Active {
        tracing::info!(user_id = id, "stale admin token refused");
        return Err(ApiError::Forbidden);
    }
    Ok(id)
}
