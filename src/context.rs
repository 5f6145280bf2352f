//! Named registries that own provider sessions and coordinate their shared
//! lifecycle.
//!
//! A [`Context`] is the namespace under which provider sessions are created.
//! Its `name` is a sharing key: two `Context` values constructed with the
//! same name observe the same underlying session registry, so a provider
//! configured through one is visible (and torn down) through the other.
//!
//! # Example
//!
//! ```ignore
//! use pulumi_plugin_host::Context;
//!
//! let ctx = Context::new(engine, installer);
//! ctx.setup().await?;
//! let provider = ctx.provider("aws").with_config(config);
//! provider.configure(None).await?;
//! // ...
//! ctx.teardown().await?;
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use semver::Version;
use tracing::{debug, info, instrument, warn};

use crate::engine::{PluginEngine, PluginInstaller, SessionHandle};
use crate::error::{Error, Result};
use crate::provider::Provider;

// Registries shared across all Context values in the process, keyed by
// context name.
static CONTEXTS: Lazy<Mutex<HashMap<String, Arc<SessionRegistry>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// The configured-session set shared by every `Context` with the same name.
pub(crate) struct SessionRegistry {
    sessions: tokio::sync::Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    fn new() -> Self {
        Self {
            sessions: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Claim the slot for `provider`. At most one session per provider name
    /// may exist in a registry at a time.
    pub(crate) async fn register(
        &self,
        context: &str,
        provider: &str,
        handle: SessionHandle,
    ) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(provider) {
            return Err(Error::already_configured(format!(
                "provider '{}' already has a session in context '{}'",
                provider, context
            )));
        }
        sessions.insert(provider.to_string(), handle);
        Ok(())
    }

    /// Release the slot for `provider`, returning its handle if it was
    /// registered.
    pub(crate) async fn unregister(&self, provider: &str) -> Option<SessionHandle> {
        self.sessions.lock().await.remove(provider)
    }

    async fn names(&self) -> Vec<String> {
        let sessions = self.sessions.lock().await;
        let mut names: Vec<String> = sessions.keys().cloned().collect();
        names.sort();
        names
    }

    async fn drain(&self) -> Vec<(String, SessionHandle)> {
        let mut sessions = self.sessions.lock().await;
        sessions.drain().collect()
    }
}

/// Optional settings for constructing a [`Context`].
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    /// Context name; auto-generated when omitted.
    pub name: Option<String>,
    /// Working directory; the process cwd when omitted.
    pub working_directory: Option<PathBuf>,
}

impl ContextOptions {
    /// Create options with every field defaulted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the context name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the working directory.
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

struct ContextInner {
    name: String,
    working_directory: PathBuf,
    engine: Arc<dyn PluginEngine>,
    installer: Arc<dyn PluginInstaller>,
    registry: Mutex<Option<Arc<SessionRegistry>>>,
}

/// A named registry owning zero or more provider sessions.
///
/// Cloning a `Context` yields a second handle to the same context; providers
/// hold such a handle as their back-reference.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a context with an auto-generated name and the process working
    /// directory. No side effects until [`setup`](Self::setup).
    pub fn new(engine: Arc<dyn PluginEngine>, installer: Arc<dyn PluginInstaller>) -> Self {
        Self::with_options(engine, installer, ContextOptions::default())
    }

    /// Create a context with explicit options.
    pub fn with_options(
        engine: Arc<dyn PluginEngine>,
        installer: Arc<dyn PluginInstaller>,
        options: ContextOptions,
    ) -> Self {
        let name = options
            .name
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let working_directory = options
            .working_directory
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            inner: Arc::new(ContextInner {
                name,
                working_directory,
                engine,
                installer,
                registry: Mutex::new(None),
            }),
        }
    }

    /// The context name (the session-sharing key).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The working directory providers are configured under.
    pub fn working_directory(&self) -> &Path {
        &self.inner.working_directory
    }

    pub(crate) fn engine(&self) -> &Arc<dyn PluginEngine> {
        &self.inner.engine
    }

    /// The shared session registry; fails if `setup()` has not been called.
    pub(crate) fn registry(&self) -> Result<Arc<SessionRegistry>> {
        let guard = self.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
        guard.clone().ok_or_else(|| {
            Error::not_configured(format!("context '{}' has not been set up", self.inner.name))
        })
    }

    /// Establish the registry entry for this context's name. Idempotent;
    /// two contexts with the same name share one registry.
    #[instrument(skip(self), fields(context = %self.inner.name))]
    pub fn setup(&self) -> Result<()> {
        let mut guard = self.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
        if guard.is_some() {
            debug!("Context already set up");
            return Ok(());
        }

        let mut contexts = CONTEXTS.lock().unwrap_or_else(|e| e.into_inner());
        let registry = contexts
            .entry(self.inner.name.clone())
            .or_insert_with(|| Arc::new(SessionRegistry::new()))
            .clone();
        *guard = Some(registry);
        info!("Context set up");
        Ok(())
    }

    /// Tear down every configured provider session under this context, then
    /// release the registry entry. Safe to call repeatedly; a failure to
    /// stop one session does not prevent stopping the rest.
    #[instrument(skip(self), fields(context = %self.inner.name))]
    pub async fn teardown(&self) -> Result<()> {
        let registry = {
            let mut guard = self.inner.registry.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        let Some(registry) = registry else {
            debug!("Context not set up, nothing to tear down");
            return Ok(());
        };

        let mut first_error = None;
        for (provider, handle) in registry.drain().await {
            debug!(provider = %provider, "Stopping provider session");
            if let Err(e) = self.inner.engine.stop(handle).await {
                warn!(provider = %provider, error = %e, "Failed to stop provider session");
                first_error.get_or_insert(e);
            }
        }

        CONTEXTS
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.inner.name);

        info!("Context torn down");
        match first_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Build an unconfigured [`Provider`] bound to this context. Pure
    /// constructor: no process is spawned and neither `name` nor any later
    /// `with_version` constraint is validated until `configure()`.
    pub fn provider(&self, name: impl Into<String>) -> Provider {
        Provider::new(self.clone(), name.into())
    }

    /// Names of the provider plugins currently configured (process running)
    /// under this context. Empty before `setup()` and after `teardown()`.
    pub async fn list_plugins(&self) -> Vec<String> {
        match self.registry() {
            Ok(registry) => registry.names().await,
            Err(_) => Vec::new(),
        }
    }

    /// Ensure a plugin is installed on disk for future `configure()` calls.
    ///
    /// `version = None` selects the latest available; `exact` requires an
    /// exact version match rather than greater-or-equal; `reinstall` forces
    /// reinstallation and ignores `exact`.
    #[instrument(skip(self), fields(context = %self.inner.name))]
    pub async fn install_plugin(
        &self,
        kind: &str,
        name: &str,
        version: Option<&Version>,
        reinstall: bool,
        exact: bool,
    ) -> Result<PathBuf> {
        info!("Installing plugin");
        let path = self
            .inner
            .installer
            .install(kind, name, version, reinstall, exact)
            .await?;
        info!(path = %path.display(), "Plugin installed");
        Ok(path)
    }

    /// Run `f` between `setup()` and a guaranteed `teardown()`.
    ///
    /// Teardown runs on every exit path, so no plugin process outlives the
    /// scope even when `f` fails.
    pub async fn scoped<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.setup()?;
        let result = f(self.clone()).await;
        let teardown = self.teardown().await;
        match result {
            Ok(value) => teardown.map(|()| value),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.inner.name)
            .field("working_directory", &self.inner.working_directory)
            .finish_non_exhaustive()
    }
}
