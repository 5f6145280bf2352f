//! Testing utilities for code built on top of the plugin host.
//!
//! [`TestEngine`] is an in-memory [`PluginEngine`] and [`PluginInstaller`]
//! that simulates plugin processes without spawning anything, so context and
//! provider logic can be exercised in plain `#[tokio::test]` functions.
//!
//! # Example
//!
//! ```ignore
//! use pulumi_plugin_host::testing::{TestEngine, TestSchema};
//!
//! #[tokio::test]
//! async fn test_lifecycle() {
//!     let engine = TestEngine::new().with_plugin("aws", TestSchema::default());
//!     let ctx = engine.context();
//!     ctx.setup().unwrap();
//!
//!     let provider = ctx.provider("aws");
//!     provider.configure(None).await.unwrap();
//!     // ...
//!     ctx.teardown().await.unwrap();
//! }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use semver::Version;
use serde_json::{json, Value};

use crate::context::Context;
use crate::engine::{PluginEngine, PluginInfo, PluginInstaller, SessionHandle};
use crate::error::{Error, Result};
use crate::urn::Urn;
use crate::value::{
    CheckFailure, CreateResult, DiffResult, PropertyDiff, PropertyMap, ReadResult, UpdateResult,
    DEFAULTS_KEY, META_KEY,
};

/// Declarative description of a simulated plugin's behavior.
///
/// Property names listed in `required` must be present in checked bags;
/// `defaults` are filled into bags that omit them; a change to a property in
/// `force_new` diffs as a replacement rather than an in-place update.
#[derive(Debug, Clone)]
pub struct TestSchema {
    /// Version the simulated plugin reports.
    pub version: Version,
    /// Property names that must be present for `check` to pass.
    pub required: Vec<String>,
    /// Default values filled in for omitted properties.
    pub defaults: PropertyMap,
    /// Property names whose change requires replacement.
    pub force_new: Vec<String>,
    /// Invokable members, keyed by member token.
    pub functions: HashMap<String, TestFunction>,
    /// The document returned by `get_schema`.
    pub document: Value,
}

impl Default for TestSchema {
    fn default() -> Self {
        Self {
            version: Version::new(0, 1, 0),
            required: Vec::new(),
            defaults: PropertyMap::new(),
            force_new: Vec::new(),
            functions: HashMap::new(),
            document: json!({}),
        }
    }
}

impl TestSchema {
    /// Create an empty schema with version 0.1.0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reported plugin version.
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Mark a property as required.
    pub fn with_required(mut self, property: impl Into<String>) -> Self {
        self.required.push(property.into());
        self
    }

    /// Register a default value for an optional property.
    pub fn with_default(mut self, property: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(property.into(), value);
        self
    }

    /// Mark a property change as requiring replacement.
    pub fn with_force_new(mut self, property: impl Into<String>) -> Self {
        self.force_new.push(property.into());
        self
    }

    /// Register a canned result for an invokable member.
    pub fn with_function(mut self, member: impl Into<String>, result: PropertyMap) -> Self {
        self.functions.entry(member.into()).or_default().result = result;
        self
    }

    /// Require an argument to be present when the member is invoked; a
    /// missing argument surfaces as an invocation-validation failure.
    pub fn with_function_required_arg(
        mut self,
        member: impl Into<String>,
        arg: impl Into<String>,
    ) -> Self {
        self.functions
            .entry(member.into())
            .or_default()
            .required
            .push(arg.into());
        self
    }

    /// Set the schema document returned by `get_schema`.
    pub fn with_document(mut self, document: Value) -> Self {
        self.document = document;
        self
    }

    fn check_bag(&self, news: &PropertyMap) -> (PropertyMap, Vec<CheckFailure>) {
        let mut props = news.clone();
        let mut filled: Vec<String> = Vec::new();
        for (key, value) in &self.defaults {
            if !props.contains_key(key) {
                props.insert(key.clone(), value.clone());
                filled.push(key.clone());
            }
        }
        filled.sort();
        props.insert(
            DEFAULTS_KEY.to_string(),
            Value::Array(filled.into_iter().map(Value::String).collect()),
        );

        let failures = self
            .required
            .iter()
            .filter(|key| !news.contains_key(*key))
            .map(|key| CheckFailure::new(key, format!("missing required property '{}'", key)))
            .collect();
        (props, failures)
    }

    fn diff_bags(
        &self,
        olds: &PropertyMap,
        news: &PropertyMap,
        ignore_changes: &[String],
    ) -> DiffResult {
        let mut keys: Vec<&String> = olds.keys().chain(news.keys()).collect();
        keys.sort();
        keys.dedup();

        let mut result = DiffResult::default();
        for key in keys {
            if key == DEFAULTS_KEY || key == META_KEY {
                continue;
            }
            if ignore_changes.iter().any(|p| p == key) {
                result.stable_keys.push(key.clone());
                continue;
            }
            let kind = match (olds.get(key), news.get(key)) {
                (Some(old), Some(new)) if old == new => {
                    result.stable_keys.push(key.clone());
                    continue;
                }
                (Some(_), Some(_)) => crate::DiffKind::Update,
                (None, Some(_)) => crate::DiffKind::Add,
                (Some(_), None) => crate::DiffKind::Delete,
                (None, None) => continue,
            };
            let kind = if self.force_new.iter().any(|p| p == key) {
                result.replace_keys.push(key.clone());
                kind.as_replace()
            } else {
                kind
            };
            result.changed_keys.push(key.clone());
            result.detailed_diff.insert(
                key.clone(),
                PropertyDiff {
                    kind,
                    input_diff: false,
                },
            );
        }
        result.changes = result.changed_keys.len();
        result
    }
}

/// An invokable member of a simulated plugin.
#[derive(Debug, Clone, Default)]
pub struct TestFunction {
    /// Argument names that must be present in the invoke args.
    pub required: Vec<String>,
    /// The result bag returned when validation passes.
    pub result: PropertyMap,
}

#[derive(Debug, Clone)]
struct Session {
    plugin: String,
    schema: TestSchema,
    #[allow(dead_code)]
    config: PropertyMap,
}

/// A record of one `install` call made against a [`TestEngine`].
#[derive(Debug, Clone)]
pub struct InstallRecord {
    /// Plugin kind, e.g. `"resource"`.
    pub kind: String,
    /// Plugin package name.
    pub name: String,
    /// Requested version, if any.
    pub version: Option<Version>,
    /// Whether reinstallation was forced.
    pub reinstall: bool,
    /// Whether an exact version match was required.
    pub exact: bool,
    /// The path the install resolved to.
    pub path: PathBuf,
}

#[derive(Default)]
struct EngineState {
    plugins: HashMap<String, TestSchema>,
    sessions: HashMap<u64, Session>,
    next_session: u64,
    resources: HashMap<String, PropertyMap>,
    next_resource: u64,
    installed: Vec<InstallRecord>,
    cancellations: Vec<SessionHandle>,
    delays: HashMap<String, Duration>,
}

/// An in-memory engine simulating plugin processes for tests.
///
/// Cloning a `TestEngine` yields a second handle to the same simulated
/// state, so a clone can be handed to [`Context`] as both the engine and
/// the installer while the original stays available for inspection.
#[derive(Clone, Default)]
pub struct TestEngine {
    state: Arc<Mutex<EngineState>>,
}

impl TestEngine {
    /// Create an engine with no plugins registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a simulated plugin.
    pub fn with_plugin(self, name: impl Into<String>, schema: TestSchema) -> Self {
        self.lock().plugins.insert(name.into(), schema);
        self
    }

    /// Delay a mutating operation (`"create"`, `"update"` or `"delete"`) by
    /// `delay` before it completes, for exercising operation timeouts.
    pub fn with_delay(self, operation: impl Into<String>, delay: Duration) -> Self {
        self.lock().delays.insert(operation.into(), delay);
        self
    }

    /// Build a [`Context`] backed by this engine, with an auto-generated
    /// name.
    pub fn context(&self) -> Context {
        Context::new(Arc::new(self.clone()), Arc::new(self.clone()))
    }

    /// Names of the plugins with a live simulated process, sorted.
    pub fn started_plugins(&self) -> Vec<String> {
        let state = self.lock();
        let mut names: Vec<String> = state.sessions.values().map(|s| s.plugin.clone()).collect();
        names.sort();
        names
    }

    /// Ids of the resources created (and not yet deleted), sorted.
    pub fn live_resources(&self) -> Vec<String> {
        let state = self.lock();
        let mut ids: Vec<String> = state.resources.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Every `install` call made so far, in order.
    pub fn installed(&self) -> Vec<InstallRecord> {
        self.lock().installed.clone()
    }

    /// Sessions that received a cancellation signal, in order.
    pub fn cancellations(&self) -> Vec<SessionHandle> {
        self.lock().cancellations.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn session(&self, handle: SessionHandle) -> Result<Session> {
        self.lock()
            .sessions
            .get(&handle.raw())
            .cloned()
            .ok_or_else(|| Error::not_configured(format!("no session {}", handle)))
    }

    async fn apply_delay(&self, operation: &str) {
        let delay = self.lock().delays.get(operation).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl PluginEngine for TestEngine {
    async fn start(
        &self,
        name: &str,
        version: Option<&Version>,
        config: &PropertyMap,
    ) -> Result<SessionHandle> {
        let mut state = self.lock();
        let schema = state
            .plugins
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PluginInstall(format!("plugin '{}' is not installed", name)))?;
        if let Some(version) = version {
            if schema.version < *version {
                return Err(Error::PluginInstall(format!(
                    "plugin '{}' is at {}, which does not satisfy {}",
                    name, schema.version, version
                )));
            }
        }
        state.next_session += 1;
        let handle = SessionHandle::new(state.next_session);
        state.sessions.insert(
            handle.raw(),
            Session {
                plugin: name.to_string(),
                schema,
                config: config.clone(),
            },
        );
        Ok(handle)
    }

    async fn stop(&self, session: SessionHandle) -> Result<()> {
        self.lock().sessions.remove(&session.raw());
        Ok(())
    }

    async fn get_plugin_info(&self, session: SessionHandle) -> Result<PluginInfo> {
        let session = self.session(session)?;
        Ok(PluginInfo {
            name: session.plugin.clone(),
            kind: "resource".to_string(),
            version: Some(session.schema.version.clone()),
            path: PathBuf::from(format!("/tmp/pulumi-plugins/resource-{}", session.plugin)),
            install_time: None,
            last_used_time: None,
            download_url: String::new(),
            size: 0,
        })
    }

    async fn get_schema(&self, session: SessionHandle, version: u32) -> Result<Vec<u8>> {
        let session = self.session(session)?;
        if version != 0 {
            return Err(Error::Schema {
                version,
                message: format!("plugin '{}' only serves schema version 0", session.plugin),
            });
        }
        Ok(serde_json::to_vec(&session.schema.document)?)
    }

    async fn check_config(
        &self,
        session: SessionHandle,
        _urn: &Urn,
        _olds: &PropertyMap,
        news: &PropertyMap,
        _allow_unknowns: bool,
    ) -> Result<(PropertyMap, Vec<CheckFailure>)> {
        self.session(session)?;
        Ok((news.clone(), Vec::new()))
    }

    async fn diff_config(
        &self,
        session: SessionHandle,
        _urn: &Urn,
        olds: &PropertyMap,
        news: &PropertyMap,
        _allow_unknowns: bool,
        ignore_changes: &[String],
    ) -> Result<DiffResult> {
        let session = self.session(session)?;
        Ok(session.schema.diff_bags(olds, news, ignore_changes))
    }

    async fn check(
        &self,
        session: SessionHandle,
        _urn: &Urn,
        _olds: &PropertyMap,
        news: &PropertyMap,
        _allow_unknowns: bool,
    ) -> Result<(PropertyMap, Vec<CheckFailure>)> {
        let session = self.session(session)?;
        Ok(session.schema.check_bag(news))
    }

    async fn diff(
        &self,
        session: SessionHandle,
        _urn: &Urn,
        _id: &str,
        olds: &PropertyMap,
        news: &PropertyMap,
        _allow_unknowns: bool,
        ignore_changes: &[String],
    ) -> Result<DiffResult> {
        let session = self.session(session)?;
        Ok(session.schema.diff_bags(olds, news, ignore_changes))
    }

    async fn create(
        &self,
        session: SessionHandle,
        urn: &Urn,
        news: &PropertyMap,
        preview: bool,
    ) -> Result<CreateResult> {
        self.session(session)?;
        self.apply_delay("create").await;
        if preview {
            return Ok(CreateResult {
                id: String::new(),
                properties: news.clone(),
                status: 0,
            });
        }
        let mut state = self.lock();
        state.next_resource += 1;
        let id = format!("{}-{}", urn.name(), state.next_resource);
        state.resources.insert(id.clone(), news.clone());
        Ok(CreateResult {
            id,
            properties: news.clone(),
            status: 0,
        })
    }

    async fn read(
        &self,
        session: SessionHandle,
        _urn: &Urn,
        id: &str,
        inputs: &PropertyMap,
        _state: &PropertyMap,
    ) -> Result<ReadResult> {
        self.session(session)?;
        let outputs = self.lock().resources.get(id).cloned();
        Ok(ReadResult {
            id: id.to_string(),
            inputs: inputs.clone(),
            outputs: outputs.unwrap_or_default(),
            status: 0,
        })
    }

    async fn update(
        &self,
        session: SessionHandle,
        _urn: &Urn,
        id: &str,
        _olds: &PropertyMap,
        news: &PropertyMap,
    ) -> Result<UpdateResult> {
        self.session(session)?;
        self.apply_delay("update").await;
        let mut state = self.lock();
        if !state.resources.contains_key(id) {
            return Err(Error::Provider {
                code: 5,
                message: format!("resource '{}' not found", id),
            });
        }
        state.resources.insert(id.to_string(), news.clone());
        Ok(UpdateResult {
            id: id.to_string(),
            properties: news.clone(),
            status: 0,
        })
    }

    async fn delete(
        &self,
        session: SessionHandle,
        _urn: &Urn,
        id: &str,
        _news: &PropertyMap,
    ) -> Result<i32> {
        self.session(session)?;
        self.apply_delay("delete").await;
        self.lock().resources.remove(id);
        Ok(0)
    }

    async fn invoke(
        &self,
        session: SessionHandle,
        member: &str,
        args: &PropertyMap,
    ) -> Result<PropertyMap> {
        let session = self.session(session)?;
        let function =
            session
                .schema
                .functions
                .get(member)
                .ok_or_else(|| Error::Provider {
                    code: 2,
                    message: format!(
                        "plugin '{}' has no function '{}'",
                        session.plugin, member
                    ),
                })?;

        let failures: Vec<CheckFailure> = function
            .required
            .iter()
            .filter(|arg| !args.contains_key(*arg))
            .map(|arg| CheckFailure::new(arg, format!("missing required argument '{}'", arg)))
            .collect();
        if !failures.is_empty() {
            return Err(Error::InvocationValidation {
                member: member.to_string(),
                failures,
            });
        }
        Ok(function.result.clone())
    }

    async fn signal_cancellation(&self, session: SessionHandle) -> Result<()> {
        self.session(session)?;
        self.lock().cancellations.push(session);
        Ok(())
    }
}

#[async_trait::async_trait]
impl PluginInstaller for TestEngine {
    async fn install(
        &self,
        kind: &str,
        name: &str,
        version: Option<&Version>,
        reinstall: bool,
        exact: bool,
    ) -> Result<PathBuf> {
        let mut state = self.lock();
        let resolved = version
            .cloned()
            .or_else(|| state.plugins.get(name).map(|s| s.version.clone()))
            .unwrap_or_else(|| Version::new(0, 0, 0));
        let path = PathBuf::from(format!(
            "/tmp/pulumi-plugins/{}-{}-v{}",
            kind, name, resolved
        ));
        state.installed.push(InstallRecord {
            kind: kind.to_string(),
            name: name.to_string(),
            version: version.cloned(),
            reinstall,
            exact,
            path: path.clone(),
        });
        Ok(path)
    }

    async fn list_available(&self, kind: Option<&str>) -> Result<Vec<PluginInfo>> {
        let state = self.lock();
        let mut infos: Vec<PluginInfo> = state
            .installed
            .iter()
            .filter(|record| kind.map_or(true, |k| record.kind == k))
            .map(|record| PluginInfo {
                name: record.name.clone(),
                kind: record.kind.clone(),
                version: record.version.clone(),
                path: record.path.clone(),
                install_time: None,
                last_used_time: None,
                download_url: String::new(),
                size: 0,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }
}
