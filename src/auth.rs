//! Authentication and account operations.
//!
//! Every store call is bounded by a timeout. A store that fails or does
//! not answer surfaces as [`AuthError::StoreUnavailable`], never as an
//! authentication failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;

use crate::clock::{Clock, SystemClock};
use crate::config::UserConfig;
use crate::crypto::{self, CredentialHasher};
use crate::error::AuthError;
use crate::gate::LoginGate;
use crate::lockout::{self, LockoutPolicy};
use crate::token::{SessionToken, TokenData, TokenEngine};
use crate::user::{
    Field, NewCustodialUserDetails, NewUserDetails, Role, StoreError,
    UpdateUserDetails, User, UserStore, ValidationError,
};

pub type Result<T> = std::result::Result<T, AuthError>;

/// Filter of [`Authenticator::find_users`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserQuery {
    Role(Role),
    Ids(Vec<String>),
}

/// Entry point of every authentication flow.
pub struct Authenticator {
    store: Arc<dyn UserStore>,
    tokens: TokenEngine,
    hasher: CredentialHasher,
    gate: Arc<LoginGate>,
    lockout: LockoutPolicy,
    verification_secret: String,
    server_secrets: HashMap<String, String>,
    store_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl Authenticator {
    /// Create a new [`Authenticator`].
    pub fn new(config: &UserConfig, store: Arc<dyn UserStore>) -> Self {
        Self {
            store,
            tokens: TokenEngine::new(&config.api_secret, config.token_duration_secs),
            hasher: CredentialHasher::new(config.salt.clone()),
            gate: Arc::new(LoginGate::new(
                config.max_concurrent_login,
                config.block_parallel_login,
            )),
            lockout: LockoutPolicy::new(
                config.max_failed_login,
                chrono::Duration::try_minutes(config.delay_before_next_login_attempt)
                    .unwrap_or(chrono::Duration::MAX),
            ),
            verification_secret: config.verification_secret.clone(),
            server_secrets: config.server_secrets.clone(),
            store_timeout: Duration::from_secs(config.store_timeout_secs),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source, of token issuance included.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.tokens = self.tokens.clone().with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    pub fn gate(&self) -> &Arc<LoginGate> {
        &self.gate
    }

    pub fn tokens(&self) -> &TokenEngine {
        &self.tokens
    }

    fn now_rfc3339(&self) -> String {
        self.clock.now().to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Await a store call, bounded by the configured timeout.
    async fn call<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, operation).await {
            Ok(result) => result.map_err(AuthError::from),
            Err(_) => Err(AuthError::StoreUnavailable(StoreError::Timeout)),
        }
    }

    /// Authenticate a user with its password and issue a session token.
    ///
    /// `duration_secs` of zero requests the default lifetime.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        duration_secs: i64,
    ) -> Result<(SessionToken, User)> {
        let result = self.try_login(username, password, duration_secs).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.kind(),
        };
        metrics::counter!("shoreline_logins_total", "outcome" => outcome).increment(1);

        result
    }

    async fn try_login(
        &self,
        username: &str,
        password: &str,
        duration_secs: i64,
    ) -> Result<(SessionToken, User)> {
        if username.is_empty() {
            return Err(ValidationError::missing(Field::Username).into());
        }
        if duration_secs < 0 {
            return Err(ValidationError::invalid(Field::TokenDuration).into());
        }

        // released on every return path.
        let permit = self.gate.enter(username);
        if let Err(denial) = permit.check() {
            tracing::warn!(%denial, "login refused by admission gate");
            return Err(denial.into());
        }

        let mut user = self.find_login_candidate(username).await?;
        let now = self.clock.now();

        if !self.lockout.can_attempt_login(&user, now) {
            tracing::info!(user_id = %user.id, "login attempt on locked account");
            return Err(AuthError::AccountLocked);
        }

        if !user.passwords_match(password, &self.hasher) {
            self.lockout.register_failure(&mut user, now);
            self.call(self.store.upsert(&user)).await?;

            tracing::info!(
                user_id = %user.id,
                failures = user.failed_login.as_ref().map(|f| f.count).unwrap_or_default(),
                "wrong password"
            );
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_email_verified(&self.verification_secret) {
            return Err(AuthError::EmailNotVerified);
        }

        if user.failed_login.as_ref().is_some_and(|f| f.count > 0) {
            lockout::record_success(&mut user);
            if let Err(err) = self.call(self.store.upsert(&user)).await {
                tracing::warn!(user_id = %user.id, error = %err, "cannot reset failed logins");
            }
        }

        let token = self.issue(
            &TokenData::user(user.id.clone(), user.roles.clone()).with_duration(duration_secs),
        )?;
        tracing::info!(user_id = %user.id, extended = token.extended, "user logged in");

        Ok((token, user))
    }

    /// Only one live account may match a login name, which is a user id,
    /// a username or an email.
    async fn find_login_candidate(&self, login: &str) -> Result<User> {
        let mut users = self.call(self.store.find_by_username_or_email(login)).await?;
        if let Some(user) = self.call(self.store.find_by_id(login)).await? {
            if !users.iter().any(|found| found.id == user.id) {
                users.push(user);
            }
        }
        users.retain(|user| !user.is_deleted());

        match users.len() {
            1 => Ok(users.remove(0)),
            0 => Err(AuthError::InvalidCredentials),
            matches => {
                tracing::warn!(matches, "login name matches several accounts");
                Err(AuthError::InvalidCredentials)
            },
        }
    }

    /// Authenticate a server with its shared secret.
    pub async fn server_login(
        &self,
        server_name: &str,
        secret: &str,
        duration_secs: i64,
    ) -> Result<SessionToken> {
        let known = self
            .server_secrets
            .get(server_name)
            .is_some_and(|expected| crypto::secrets_match(expected, secret));

        if !known {
            tracing::warn!(server = %server_name, "server login refused");
            metrics::counter!("shoreline_logins_total", "outcome" => "server_refused").increment(1);
            return Err(AuthError::InvalidCredentials);
        }

        let token = self.issue(&TokenData::server(server_name).with_duration(duration_secs))?;
        tracing::info!(server = %server_name, "server logged in");
        metrics::counter!("shoreline_logins_total", "outcome" => "server_success").increment(1);

        Ok(token)
    }

    /// Decode a session token.
    pub fn check_token(&self, token: &str) -> Result<TokenData> {
        self.tokens.verify(token).map_err(|err| {
            tracing::debug!(error = %err, "session token refused");
            AuthError::from(err)
        })
    }

    fn issue(&self, data: &TokenData) -> Result<SessionToken> {
        let token = self.tokens.issue(data)?;

        let kind = if token.is_server { "server" } else { "user" };
        metrics::counter!("shoreline_tokens_issued_total", "kind" => kind).increment(1);

        Ok(token)
    }

    /// Refuse login names already used by another account, as username or
    /// email. A shared name would make both accounts unable to log in.
    async fn ensure_available<'a, I>(&self, names: I, except: Option<&str>) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for name in names.into_iter().filter(|name| !name.is_empty()) {
            let taken = self
                .call(self.store.find_by_username_or_email(name))
                .await?
                .iter()
                .any(|user| Some(user.id.as_str()) != except);

            if taken {
                tracing::info!(name = %name, "login name already in use");
                return Err(AuthError::UserExists);
            }
        }

        Ok(())
    }

    /// Register a standard user and log it in.
    pub async fn create_user(&self, details: &NewUserDetails) -> Result<(SessionToken, User)> {
        let mut user = User::new(details, &self.hasher)?;
        self.ensure_available(login_names(&user), None).await?;

        user.created_time = Some(self.now_rfc3339());
        self.call(self.store.upsert(&user)).await?;
        tracing::info!(user_id = %user.id, "user created");

        let token = self.issue(&TokenData::user(user.id.clone(), user.roles.clone()))?;
        Ok((token, user))
    }

    /// Register a custodial user on behalf of `custodian_id`.
    pub async fn create_custodial_user(
        &self,
        caller: &TokenData,
        custodian_id: &str,
        details: &NewCustodialUserDetails,
    ) -> Result<User> {
        authorize(caller, custodian_id)?;
        self.find_live_user(custodian_id).await?;

        let mut user = User::new_custodial(details)?;
        self.ensure_available(login_names(&user), None).await?;

        user.created_time = Some(self.now_rfc3339());
        user.created_user_id = Some(caller.user_id.clone());
        self.call(self.store.upsert(&user)).await?;
        tracing::info!(user_id = %user.id, custodian = %custodian_id, "custodial user created");

        Ok(user)
    }

    async fn find_live_user(&self, user_id: &str) -> Result<User> {
        match self.call(self.store.find_by_id(user_id)).await? {
            Some(user) if !user.is_deleted() => Ok(user),
            _ => Err(AuthError::UserNotFound),
        }
    }

    /// Read a user, as itself or as a server.
    pub async fn get_user(&self, caller: &TokenData, user_id: &str) -> Result<User> {
        authorize(caller, user_id)?;
        self.find_live_user(user_id).await
    }

    /// Apply a partial update. Roles and email verification are reserved
    /// to servers.
    pub async fn update_user(
        &self,
        caller: &TokenData,
        user_id: &str,
        details: &UpdateUserDetails,
    ) -> Result<User> {
        authorize(caller, user_id)?;
        if details.is_privileged() && !caller.is_server {
            return Err(AuthError::Forbidden);
        }

        let mut user = self.find_live_user(user_id).await?;
        user.apply_update(details, &self.hasher)?;

        let names = details
            .username
            .iter()
            .chain(details.emails.iter().flatten())
            .map(String::as_str)
            .collect::<Vec<&str>>();
        self.ensure_available(names, Some(&user.id)).await?;

        user.modified_time = Some(self.now_rfc3339());
        user.modified_user_id = Some(caller.user_id.clone());
        self.call(self.store.upsert(&user)).await?;
        tracing::info!(user_id = %user.id, by = %caller.user_id, "user updated");

        Ok(user)
    }

    /// Mark a user as deleted. The record is kept.
    pub async fn delete_user(&self, caller: &TokenData, user_id: &str) -> Result<()> {
        authorize(caller, user_id)?;

        let mut user = self.find_live_user(user_id).await?;
        user.deleted_time = Some(self.now_rfc3339());
        user.deleted_user_id = Some(caller.user_id.clone());
        self.call(self.store.upsert(&user)).await?;
        tracing::info!(user_id = %user.id, by = %caller.user_id, "user deleted");

        Ok(())
    }

    /// List live users. Servers only.
    pub async fn find_users(&self, caller: &TokenData, query: &UserQuery) -> Result<Vec<User>> {
        if !caller.is_server {
            return Err(AuthError::Forbidden);
        }

        let users = match query {
            UserQuery::Role(role) => self.call(self.store.find_by_role(*role)).await?,
            UserQuery::Ids(ids) => self.call(self.store.find_by_ids(ids)).await?,
        };

        Ok(users.into_iter().filter(|user| !user.is_deleted()).collect())
    }

    /// Whether the store answers.
    pub async fn ping(&self) -> Result<()> {
        self.call(self.store.ping()).await
    }
}

fn login_names(user: &User) -> impl Iterator<Item = &str> {
    std::iter::once(user.username.as_str()).chain(user.emails.iter().map(String::as_str))
}

/// Servers may act on anyone, users on themselves.
fn authorize(caller: &TokenData, user_id: &str) -> Result<()> {
    if caller.is_server || caller.user_id == user_id {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}
