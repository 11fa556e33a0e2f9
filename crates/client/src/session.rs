//! Session token lifecycle.
//!
//! [`SessionManager`] turns either the on-disk token cache or a fresh
//! `/login` exchange into a [`Session`]. A `Session` is an immutable value:
//! the dispatcher and every job watcher read the same one through the
//! [`SaltApi`](crate::api::SaltApi) built from it, and re-authentication
//! produces a new value instead of mutating shared state.
//!
//! The cache is a single file holding the token as a JSON string. It is
//! written back once per run by a [`SessionGuard`], including on error
//! paths, so the next invocation can reuse the token.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::header::HeaderValue;
use reqwest::Url;

use crate::api::SaltApi;
use crate::error::ClientError;
use crate::messages::{LoginGrant, LoginRequest};

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session_id";

/// Prompt shown when asking for the login secret.
const PASSWORD_PROMPT: &str = "Password: ";

/// Where the current token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No token; every authenticated request will be rejected.
    Absent,
    /// Read from the local cache and not yet accepted by the server.
    Cached,
    /// Returned by a successful `/login` during this run.
    Confirmed,
}

/// An authentication token scoped to one salt-api origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    token: String,
    origin: Url,
    state: TokenState,
    grant: Option<LoginGrant>,
}

impl Session {
    pub fn absent(origin: Url) -> Self {
        Self {
            token: String::new(),
            origin,
            state: TokenState::Absent,
            grant: None,
        }
    }

    /// A session built from a cached token. An empty token is absent.
    pub fn cached(token: String, origin: Url) -> Self {
        if token.is_empty() {
            return Self::absent(origin);
        }
        Self {
            token,
            origin,
            state: TokenState::Cached,
            grant: None,
        }
    }

    pub fn confirmed(grant: LoginGrant, origin: Url) -> Self {
        Self {
            token: grant.token.clone(),
            origin,
            state: TokenState::Confirmed,
            grant: Some(grant),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn state(&self) -> TokenState {
        self.state
    }

    /// Login metadata, present only on confirmed sessions.
    pub fn grant(&self) -> Option<&LoginGrant> {
        self.grant.as_ref()
    }

    /// `Set-Cookie` style binding of the token, e.g. `session_id=abc`.
    pub fn cookie(&self) -> String {
        format!("{SESSION_COOKIE}={}", self.token)
    }
}

/// Username and eauth module sent to `/login`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub eauth: String,
}

/// Source of the login secret.
pub trait SecretPrompt: Send + Sync {
    /// Show `prompt` and return the secret the user typed.
    fn read_secret(&self, prompt: &str) -> io::Result<String>;
}

/// Reads the secret from the controlling terminal without echoing it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl SecretPrompt for TerminalPrompt {
    fn read_secret(&self, prompt: &str) -> io::Result<String> {
        rpassword::prompt_password(prompt)
    }
}

/// JSON-encoded token cache on local disk.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached token.
    ///
    /// Returns `Ok(None)` when no cache exists. A cache that is not a
    /// JSON string is reported and treated as absent, since a fresh login
    /// replaces it anyway.
    pub fn load(&self) -> io::Result<Option<String>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        match serde_json::from_str::<String>(&raw) {
            Ok(token) => Ok(Some(token)),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring unreadable token cache",
                );
                Ok(None)
            }
        }
    }

    /// Write `token` as a JSON string, creating the parent directory.
    pub fn save(&self, token: &str) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            ensure_private_dir(dir)?;
        }

        let mut encoded = serde_json::to_string(token).map_err(io::Error::other)?;
        encoded.push('\n');
        std::fs::write(&self.path, encoded)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

/// Create `dir` (and parents) readable only by the current user.
fn ensure_private_dir(dir: &Path) -> io::Result<()> {
    if dir.as_os_str().is_empty() || dir.is_dir() {
        return Ok(());
    }

    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

/// Produces sessions from the token cache or from `/login`.
pub struct SessionManager {
    origin: Url,
    store: TokenStore,
    prompt: Arc<dyn SecretPrompt>,
}

impl SessionManager {
    pub fn new(origin: Url, store: TokenStore, prompt: Arc<dyn SecretPrompt>) -> Self {
        Self {
            origin,
            store,
            prompt,
        }
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Build a session from the local token cache. Never touches the
    /// network; the token is only checked when it is first used. A cached
    /// token that is not a valid header value is treated as absent.
    pub fn load_cached_session(&self) -> Result<Session, ClientError> {
        if let Some(dir) = self.store.path().parent() {
            ensure_private_dir(dir)?;
        }

        match self.store.load()? {
            Some(token) if HeaderValue::from_str(&token).is_err() => {
                tracing::warn!(
                    path = %self.store.path().display(),
                    "Ignoring cached token that cannot be sent as a header",
                );
                Ok(Session::absent(self.origin.clone()))
            }
            Some(token) => {
                tracing::debug!(path = %self.store.path().display(), "Loaded cached token");
                Ok(Session::cached(token, self.origin.clone()))
            }
            None => {
                tracing::info!("No token found");
                Ok(Session::absent(self.origin.clone()))
            }
        }
    }

    /// Prompt for the secret and log in.
    ///
    /// Fails with [`ClientError::AuthFailure`] when salt-api rejects the
    /// credentials.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Session, ClientError> {
        let prompt = Arc::clone(&self.prompt);
        let password = tokio::task::spawn_blocking(move || prompt.read_secret(PASSWORD_PROMPT))
            .await
            .map_err(io::Error::other)??;

        self.login(credentials, &password).await
    }

    /// Log in with an already known secret.
    pub async fn login(
        &self,
        credentials: &Credentials,
        password: &str,
    ) -> Result<Session, ClientError> {
        let api = SaltApi::anonymous(&self.origin)?;
        let request = LoginRequest {
            eauth: &credentials.eauth,
            username: &credentials.username,
            password,
        };

        let grant = match api.login(&request).await {
            Ok(grant) => grant,
            Err(e) => {
                tracing::error!(
                    username = %credentials.username,
                    eauth = %credentials.eauth,
                    error = %e,
                    "Login failed",
                );
                return Err(e);
            }
        };

        tracing::info!(
            user = %grant.user,
            eauth = %grant.eauth,
            expires_at = ?grant.expires_at(),
            "Authenticated with salt-api",
        );

        Ok(Session::confirmed(grant, self.origin.clone()))
    }

    /// Write the session's token to the cache now.
    pub fn persist(&self, session: &Session) -> Result<(), ClientError> {
        self.store.save(session.token())?;
        Ok(())
    }

    /// A guard that persists the newest session token when dropped.
    pub fn guard(&self, session: &Session) -> SessionGuard {
        SessionGuard {
            store: self.store.clone(),
            token: session.token().to_string(),
            persisted: false,
        }
    }
}

/// Writes the token cache exactly once, at the end of its scope.
///
/// Call [`persist`](Self::persist) to write explicitly and observe the
/// result; otherwise the write happens on drop and failures are logged.
pub struct SessionGuard {
    store: TokenStore,
    token: String,
    persisted: bool,
}

impl SessionGuard {
    /// Track a newer session, e.g. after re-authentication.
    pub fn update(&mut self, session: &Session) {
        self.token = session.token().to_string();
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn persist(mut self) -> io::Result<()> {
        self.persisted = true;
        self.store.save(&self.token)
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        self.persisted = true;
        if let Err(e) = self.store.save(&self.token) {
            tracing::error!(
                path = %self.store.path().display(),
                error = %e,
                "Failed to persist session token",
            );
        }
    }
}
