//! One session with a resource-provider plugin process.
//!
//! A [`Provider`] moves through `Unconfigured -> Configured -> TornDown`.
//! Construction has no side effects; the plugin process only starts at
//! [`configure`](Provider::configure), and every RPC outside the
//! `Configured` state fails with a `NotConfigured` session error. Teardown
//! is terminal for the session but a fresh `Provider` can be built from the
//! owning [`Context`](crate::Context) at any time.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use semver::Version;
use tracing::{debug, info, instrument};

use crate::context::Context;
use crate::engine::{PluginInfo, SessionHandle};
use crate::error::{Error, Result};
use crate::urn::Urn;
use crate::value::{
    bag_unknown_keys, CheckFailure, CreateResult, DiffResult, PropertyMap, ReadResult,
    UpdateResult,
};

/// Default bound for `create`/`update`/`delete` operations.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
enum SessionState {
    Unconfigured,
    Configured(SessionHandle),
    TornDown,
}

/// A session with a single resource-provider plugin.
pub struct Provider {
    context: Context,
    name: String,
    version: Option<Version>,
    config: PropertyMap,
    state: Mutex<SessionState>,
}

impl Provider {
    pub(crate) fn new(context: Context, name: String) -> Self {
        Self {
            context,
            name,
            version: None,
            config: PropertyMap::new(),
            state: Mutex::new(SessionState::Unconfigured),
        }
    }

    /// Set the configuration sent to the plugin at `configure()` time.
    pub fn with_config(mut self, config: PropertyMap) -> Self {
        self.config = config;
        self
    }

    /// Pin the plugin to a semantic version constraint. Validated against
    /// the actual plugin at `configure()` time, not eagerly.
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// The plugin package name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stored configuration bag.
    pub fn config(&self) -> &PropertyMap {
        &self.config
    }

    /// The version constraint, if any.
    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    /// The owning context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn session(&self) -> Result<SessionHandle> {
        match self.state() {
            SessionState::Configured(handle) => Ok(handle),
            SessionState::Unconfigured | SessionState::TornDown => {
                Err(Error::not_configured(format!(
                    "provider '{}' in context '{}'",
                    self.name,
                    self.context.name()
                )))
            }
        }
    }

    /// Start the plugin process and send it a configuration bag (`inputs`,
    /// or the stored config when `None`).
    ///
    /// This is the only operation with process-level side effects. A second
    /// `configure()` for the same `(context, provider)` pair before teardown
    /// is a protocol error (`AlreadyConfigured`), never a silent reuse.
    #[instrument(skip(self, inputs), fields(context = %self.context.name(), provider = %self.name))]
    pub async fn configure(&self, inputs: Option<&PropertyMap>) -> Result<()> {
        match self.state() {
            SessionState::Unconfigured => {}
            SessionState::Configured(_) => {
                return Err(Error::already_configured(format!(
                    "provider '{}' in context '{}'",
                    self.name,
                    self.context.name()
                )));
            }
            SessionState::TornDown => {
                return Err(Error::not_configured(format!(
                    "provider '{}' in context '{}' was torn down",
                    self.name,
                    self.context.name()
                )));
            }
        }

        let registry = self.context.registry()?;
        let config = inputs.unwrap_or(&self.config);

        debug!("Starting plugin process");
        let handle = self
            .context
            .engine()
            .start(&self.name, self.version.as_ref(), config)
            .await?;

        if let Err(e) = registry
            .register(self.context.name(), &self.name, handle)
            .await
        {
            // Another session claimed the slot; undo the start.
            let _ = self.context.engine().stop(handle).await;
            return Err(e);
        }

        self.set_state(SessionState::Configured(handle));
        info!("Provider configured");
        Ok(())
    }

    /// Stop the plugin process and release its resources. No-op when the
    /// session is not configured; terminal afterwards.
    #[instrument(skip(self), fields(context = %self.context.name(), provider = %self.name))]
    pub async fn teardown(&self) -> Result<()> {
        let handle = match self.state() {
            SessionState::Configured(handle) => handle,
            SessionState::Unconfigured | SessionState::TornDown => {
                debug!("Provider not configured, nothing to tear down");
                return Ok(());
            }
        };

        self.set_state(SessionState::TornDown);
        if let Ok(registry) = self.context.registry() {
            registry.unregister(&self.name).await;
        }
        self.context.engine().stop(handle).await?;
        info!("Provider torn down");
        Ok(())
    }

    /// Install metadata for the plugin behind this session. Purely
    /// informational.
    pub async fn get_plugin_info(&self) -> Result<PluginInfo> {
        let session = self.session()?;
        self.context.engine().get_plugin_info(session).await
    }

    /// The plugin's schema document, parsed. `version` 0 selects the
    /// default/latest schema known to the plugin.
    #[instrument(skip(self), fields(provider = %self.name))]
    pub async fn get_schema(&self, version: u32) -> Result<serde_json::Value> {
        let raw = self.get_schema_raw(version).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// The plugin's schema document as raw bytes, for callers that parse it
    /// themselves.
    pub async fn get_schema_raw(&self, version: u32) -> Result<Vec<u8>> {
        let session = self.session()?;
        self.context.engine().get_schema(session, version).await
    }

    /// Validate a provider-level configuration transition.
    ///
    /// Returns the validated properties and the validation failures, or
    /// `None` when the bag is valid. With `allow_unknowns = false`, unknown
    /// sentinels in `news` are rejected as validation failures without
    /// reaching the plugin.
    #[instrument(skip(self, olds, news), fields(provider = %self.name, urn = %urn))]
    pub async fn check_config(
        &self,
        urn: &Urn,
        olds: &PropertyMap,
        news: &PropertyMap,
        allow_unknowns: bool,
    ) -> Result<(PropertyMap, Option<Vec<CheckFailure>>)> {
        let session = self.session()?;

        if !allow_unknowns {
            let unknown = bag_unknown_keys(news);
            if !unknown.is_empty() {
                let failures = unknown
                    .into_iter()
                    .map(|key| {
                        CheckFailure::new(key, "unknown values are not allowed in configuration")
                    })
                    .collect();
                return Ok((news.clone(), Some(failures)));
            }
        }

        let (props, failures) = self
            .context
            .engine()
            .check_config(session, urn, olds, news, allow_unknowns)
            .await?;
        Ok((props, none_if_empty(failures)))
    }

    /// Compute the impact of a hypothetical provider configuration change
    /// without applying it. Property paths in `ignore_changes` are excluded
    /// from the comparison.
    #[instrument(skip(self, olds, news, ignore_changes), fields(provider = %self.name, urn = %urn))]
    pub async fn diff_config(
        &self,
        urn: &Urn,
        olds: &PropertyMap,
        news: &PropertyMap,
        allow_unknowns: bool,
        ignore_changes: &[String],
    ) -> Result<DiffResult> {
        let session = self.session()?;
        self.context
            .engine()
            .diff_config(session, urn, olds, news, allow_unknowns, ignore_changes)
            .await
    }

    /// Validate a resource property bag against its type's schema.
    ///
    /// The validated output includes defaults for omitted optional
    /// properties and the reserved `__defaults` key naming them. Ordinary
    /// validation problems come back as failures; raised errors are
    /// reserved for protocol-level faults.
    #[instrument(skip(self, olds, news), fields(provider = %self.name, urn = %urn))]
    pub async fn check(
        &self,
        urn: &Urn,
        olds: &PropertyMap,
        news: &PropertyMap,
        allow_unknowns: bool,
    ) -> Result<(PropertyMap, Option<Vec<CheckFailure>>)> {
        let session = self.session()?;
        let (props, failures) = self
            .context
            .engine()
            .check(session, urn, olds, news, allow_unknowns)
            .await?;
        Ok((props, none_if_empty(failures)))
    }

    /// Compare two already-checked property bags for the existing instance
    /// identified by `id`.
    #[instrument(skip(self, olds, news, ignore_changes), fields(provider = %self.name, urn = %urn, id = %id))]
    pub async fn diff(
        &self,
        urn: &Urn,
        id: &str,
        olds: &PropertyMap,
        news: &PropertyMap,
        allow_unknowns: bool,
        ignore_changes: &[String],
    ) -> Result<DiffResult> {
        let session = self.session()?;
        self.context
            .engine()
            .diff(session, urn, id, olds, news, allow_unknowns, ignore_changes)
            .await
    }

    /// Allocate a new resource instance.
    ///
    /// With `preview`, the plugin validates and predicts the resulting
    /// property bag without any real-world side effect and assigns an empty
    /// id. Exceeding `timeout` fails with [`Error::Timeout`].
    #[instrument(skip(self, news), fields(provider = %self.name, urn = %urn))]
    pub async fn create(
        &self,
        urn: &Urn,
        news: &PropertyMap,
        timeout: Duration,
        preview: bool,
    ) -> Result<CreateResult> {
        let session = self.session()?;
        info!("Create called");
        let result = bounded(
            "create",
            timeout,
            self.context.engine().create(session, urn, news, preview),
        )
        .await?;
        info!(id = %result.id, status = result.status, "Create completed");
        Ok(result)
    }

    /// Fetch live state for the instance identified by `id`, using `inputs`
    /// and `state` only as identification hints. A missing resource yields
    /// empty outputs rather than an error.
    #[instrument(skip(self, inputs, state), fields(provider = %self.name, urn = %urn, id = %id))]
    pub async fn read(
        &self,
        urn: &Urn,
        id: &str,
        inputs: &PropertyMap,
        state: &PropertyMap,
    ) -> Result<ReadResult> {
        let session = self.session()?;
        self.context
            .engine()
            .read(session, urn, id, inputs, state)
            .await
    }

    /// Apply an in-place update to the instance identified by `id`.
    #[instrument(skip(self, olds, news), fields(provider = %self.name, urn = %urn, id = %id))]
    pub async fn update(
        &self,
        urn: &Urn,
        id: &str,
        olds: &PropertyMap,
        news: &PropertyMap,
        timeout: Duration,
    ) -> Result<UpdateResult> {
        let session = self.session()?;
        info!("Update called");
        let result = bounded(
            "update",
            timeout,
            self.context.engine().update(session, urn, id, olds, news),
        )
        .await?;
        info!(id = %result.id, status = result.status, "Update completed");
        Ok(result)
    }

    /// Destroy the instance identified by `id`. Returns the status code
    /// (0 = success).
    #[instrument(skip(self, news), fields(provider = %self.name, urn = %urn, id = %id))]
    pub async fn delete(
        &self,
        urn: &Urn,
        id: &str,
        news: &PropertyMap,
        timeout: Duration,
    ) -> Result<i32> {
        let session = self.session()?;
        info!("Delete called");
        let status = bounded(
            "delete",
            timeout,
            self.context.engine().delete(session, urn, id, news),
        )
        .await?;
        info!(status, "Delete completed");
        Ok(status)
    }

    /// Call a provider-defined function and return its result bag.
    ///
    /// Argument-validation failures come back as
    /// [`Error::InvocationValidation`]; any other invocation failure is an
    /// [`Error::Provider`] with the provider-assigned code.
    #[instrument(skip(self, args), fields(provider = %self.name, member = %member))]
    pub async fn invoke(&self, member: &str, args: &PropertyMap) -> Result<PropertyMap> {
        let session = self.session()?;
        self.context.engine().invoke(session, member, args).await
    }

    /// Best-effort, non-blocking request that the plugin abort in-flight
    /// work. Never fails for an idle provider; callers must still honor
    /// operation timeouts.
    #[instrument(skip(self), fields(provider = %self.name))]
    pub async fn signal_cancellation(&self) -> Result<()> {
        let session = self.session()?;
        self.context.engine().signal_cancellation(session).await
    }

    /// Run `f` between `configure()` and a guaranteed `teardown()`.
    pub async fn scoped<'a, F, Fut, T>(&'a self, f: F) -> Result<T>
    where
        F: FnOnce(&'a Provider) -> Fut,
        Fut: Future<Output = Result<T>> + 'a,
    {
        self.configure(None).await?;
        let result = f(self).await;
        let teardown = self.teardown().await;
        match result {
            Ok(value) => teardown.map(|()| value),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.name)
            .field("context", &self.context.name())
            .field("version", &self.version)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn none_if_empty(failures: Vec<CheckFailure>) -> Option<Vec<CheckFailure>> {
    if failures.is_empty() {
        None
    } else {
        Some(failures)
    }
}

async fn bounded<T>(
    operation: &'static str,
    timeout: Duration,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout { operation, timeout }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SessionErrorKind;
    use crate::testing::{TestEngine, TestSchema};
    use crate::value::UnknownValue;
    use serde_json::json;

    fn props(value: serde_json::Value) -> PropertyMap {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected object, got {:?}", other),
        }
    }

    fn bucket_schema() -> TestSchema {
        TestSchema::new()
            .with_required("bucket")
            .with_default("acl", json!("private"))
            .with_force_new("bucket")
    }

    async fn configured(engine: &TestEngine) -> (crate::Context, Provider) {
        let ctx = engine.context();
        ctx.setup().unwrap();
        let provider = ctx.provider("aws");
        provider.configure(None).await.unwrap();
        (ctx, provider)
    }

    fn urn() -> Urn {
        Urn::named("aws:s3/bucket:Bucket", "my-bucket").unwrap()
    }

    #[tokio::test]
    async fn test_rpc_before_configure_fails() {
        let engine = TestEngine::new().with_plugin("aws", bucket_schema());
        let ctx = engine.context();
        ctx.setup().unwrap();

        let provider = ctx.provider("aws");
        let err = provider.get_schema(0).await.unwrap_err();
        assert_eq!(err.session_kind(), Some(SessionErrorKind::NotConfigured));
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_configure_fails() {
        let engine = TestEngine::new().with_plugin("aws", bucket_schema());
        let (ctx, provider) = configured(&engine).await;

        let err = provider.configure(None).await.unwrap_err();
        assert_eq!(err.session_kind(), Some(SessionErrorKind::AlreadyConfigured));
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_is_terminal() {
        let engine = TestEngine::new().with_plugin("aws", bucket_schema());
        let (ctx, provider) = configured(&engine).await;

        provider.teardown().await.unwrap();
        assert!(engine.started_plugins().is_empty());
        assert!(ctx.list_plugins().await.is_empty());

        // A torn-down session cannot be reconfigured or used.
        let err = provider.configure(None).await.unwrap_err();
        assert_eq!(err.session_kind(), Some(SessionErrorKind::NotConfigured));
        let err = provider.get_schema(0).await.unwrap_err();
        assert_eq!(err.session_kind(), Some(SessionErrorKind::NotConfigured));

        // But teardown itself stays a no-op.
        provider.teardown().await.unwrap();
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_configure_registers_with_context() {
        let engine = TestEngine::new().with_plugin("aws", bucket_schema());
        let (ctx, _provider) = configured(&engine).await;

        assert_eq!(ctx.list_plugins().await, vec!["aws".to_string()]);
        assert_eq!(engine.started_plugins(), vec!["aws".to_string()]);
        ctx.teardown().await.unwrap();
        assert!(engine.started_plugins().is_empty());
    }

    #[tokio::test]
    async fn test_check_fills_defaults() {
        let engine = TestEngine::new().with_plugin("aws", bucket_schema());
        let (ctx, provider) = configured(&engine).await;

        let (checked, failures) = provider
            .check(&urn(), &PropertyMap::new(), &props(json!({"bucket": "b"})), false)
            .await
            .unwrap();
        assert!(failures.is_none());
        assert_eq!(checked["bucket"], json!("b"));
        assert_eq!(checked["acl"], json!("private"));
        assert_eq!(checked[crate::value::DEFAULTS_KEY], json!(["acl"]));
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_check_missing_required() {
        let engine = TestEngine::new().with_plugin("aws", bucket_schema());
        let (ctx, provider) = configured(&engine).await;

        let (checked, failures) = provider
            .check(&urn(), &PropertyMap::new(), &PropertyMap::new(), false)
            .await
            .unwrap();
        let failures = failures.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].property, "bucket");
        // Defaults are filled even alongside failures.
        assert_eq!(checked["acl"], json!("private"));
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_check_config_rejects_unknowns() {
        let engine = TestEngine::new().with_plugin("aws", bucket_schema());
        let (ctx, provider) = configured(&engine).await;

        let mut news = PropertyMap::new();
        news.insert("region".to_string(), UnknownValue::String.to_value());

        let (_, failures) = provider
            .check_config(&urn(), &PropertyMap::new(), &news, false)
            .await
            .unwrap();
        let failures = failures.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].property, "region");

        // With allow_unknowns the same bag passes.
        let (_, failures) = provider
            .check_config(&urn(), &PropertyMap::new(), &news, true)
            .await
            .unwrap();
        assert!(failures.is_none());
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_diff_self_is_unchanged() {
        let engine = TestEngine::new().with_plugin("aws", bucket_schema());
        let (ctx, provider) = configured(&engine).await;

        let bag = props(json!({"bucket": "b", "acl": "private"}));
        let diff = provider
            .diff(&urn(), "id-1", &bag, &bag, false, &[])
            .await
            .unwrap();
        assert_eq!(diff.changes, 0);
        assert!(diff.changed_keys.is_empty());
        assert_eq!(
            diff.stable_keys,
            vec!["acl".to_string(), "bucket".to_string()]
        );
        assert!(!diff.requires_replacement());
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_diff_force_new_requires_replacement() {
        let engine = TestEngine::new().with_plugin("aws", bucket_schema());
        let (ctx, provider) = configured(&engine).await;

        let olds = props(json!({"bucket": "a"}));
        let news = props(json!({"bucket": "b"}));
        let diff = provider
            .diff(&urn(), "id-1", &olds, &news, false, &[])
            .await
            .unwrap();
        assert_eq!(diff.changes, 1);
        assert_eq!(diff.replace_keys, vec!["bucket".to_string()]);
        assert!(diff.requires_replacement());
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_preview_has_no_side_effect() {
        let engine = TestEngine::new().with_plugin("aws", bucket_schema());
        let (ctx, provider) = configured(&engine).await;

        let result = provider
            .create(
                &urn(),
                &props(json!({"bucket": "b"})),
                DEFAULT_OPERATION_TIMEOUT,
                true,
            )
            .await
            .unwrap();
        assert_eq!(result.id, "");
        assert_eq!(result.properties["bucket"], json!("b"));
        assert!(engine.live_resources().is_empty());
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_read_update_delete() {
        let engine = TestEngine::new().with_plugin("aws", bucket_schema());
        let (ctx, provider) = configured(&engine).await;
        let urn = urn();

        let created = provider
            .create(
                &urn,
                &props(json!({"bucket": "b"})),
                DEFAULT_OPERATION_TIMEOUT,
                false,
            )
            .await
            .unwrap();
        assert!(!created.id.is_empty());
        assert_eq!(created.status, 0);

        let read = provider
            .read(&urn, &created.id, &PropertyMap::new(), &PropertyMap::new())
            .await
            .unwrap();
        assert_eq!(read.outputs["bucket"], json!("b"));

        let updated = provider
            .update(
                &urn,
                &created.id,
                &created.properties,
                &props(json!({"bucket": "b", "acl": "public"})),
                DEFAULT_OPERATION_TIMEOUT,
            )
            .await
            .unwrap();
        assert_eq!(updated.properties["acl"], json!("public"));

        let status = provider
            .delete(
                &urn,
                &created.id,
                &updated.properties,
                DEFAULT_OPERATION_TIMEOUT,
            )
            .await
            .unwrap();
        assert_eq!(status, 0);
        assert!(engine.live_resources().is_empty());

        // Reading a deleted resource yields empty outputs, not an error.
        let read = provider
            .read(&urn, &created.id, &PropertyMap::new(), &PropertyMap::new())
            .await
            .unwrap();
        assert!(read.outputs.is_empty());
        ctx.teardown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_times_out() {
        let engine = TestEngine::new()
            .with_plugin("aws", bucket_schema())
            .with_delay("create", Duration::from_secs(120));
        let (ctx, provider) = configured(&engine).await;

        let err = provider
            .create(
                &urn(),
                &props(json!({"bucket": "b"})),
                Duration::from_secs(1),
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Timeout {
                operation: "create",
                ..
            }
        ));
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_schema_decodes_document() {
        let schema = bucket_schema().with_document(json!({"name": "aws", "version": "6.0.0"}));
        let engine = TestEngine::new().with_plugin("aws", schema);
        let (ctx, provider) = configured(&engine).await;

        let document = provider.get_schema(0).await.unwrap();
        assert_eq!(document["name"], json!("aws"));

        let raw = provider.get_schema_raw(0).await.unwrap();
        assert_eq!(
            serde_json::from_slice::<serde_json::Value>(&raw).unwrap(),
            document
        );

        let err = provider.get_schema(2).await.unwrap_err();
        assert!(matches!(err, Error::Schema { version: 2, .. }));
        ctx.teardown().await.unwrap();
    }

    #[test]
    fn test_builder_accessors() {
        let engine = TestEngine::new().with_plugin("aws", bucket_schema());
        let ctx = engine.context();

        let provider = ctx.provider("aws");
        assert_eq!(provider.name(), "aws");
        assert_eq!(provider.version(), None);
        assert!(provider.config().is_empty());

        let provider = provider
            .with_version(Version::new(1, 2, 3))
            .with_config(props(json!({"region": "us-east-1"})));
        assert_eq!(provider.version(), Some(&Version::new(1, 2, 3)));
        assert_eq!(provider.config()["region"], json!("us-east-1"));
    }

    #[tokio::test]
    async fn test_invoke_validation_failures_are_distinguished() {
        let schema = bucket_schema()
            .with_function("aws:s3/getBucket:getBucket", props(json!({"arn": "arn:x"})))
            .with_function_required_arg("aws:s3/getBucket:getBucket", "bucket");
        let engine = TestEngine::new().with_plugin("aws", schema);
        let (ctx, provider) = configured(&engine).await;

        // A missing required argument is a validation fault, not a generic
        // provider error.
        let err = provider
            .invoke("aws:s3/getBucket:getBucket", &PropertyMap::new())
            .await
            .unwrap_err();
        match err {
            Error::InvocationValidation { member, failures } => {
                assert_eq!(member, "aws:s3/getBucket:getBucket");
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].property, "bucket");
            }
            other => panic!("expected invocation validation error, got {:?}", other),
        }

        // An unknown member stays a provider error.
        let err = provider
            .invoke("aws:index:missing", &PropertyMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));

        let result = provider
            .invoke(
                "aws:s3/getBucket:getBucket",
                &props(json!({"bucket": "b"})),
            )
            .await
            .unwrap();
        assert_eq!(result["arn"], json!("arn:x"));
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invoke_and_cancellation() {
        let schema = bucket_schema()
            .with_function("aws:index:getRegion", props(json!({"name": "us-east-1"})));
        let engine = TestEngine::new().with_plugin("aws", schema);
        let (ctx, provider) = configured(&engine).await;

        let result = provider
            .invoke("aws:index:getRegion", &PropertyMap::new())
            .await
            .unwrap();
        assert_eq!(result["name"], json!("us-east-1"));

        provider.signal_cancellation().await.unwrap();
        assert_eq!(engine.cancellations().len(), 1);
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_scoped_tears_down_on_error() {
        let engine = TestEngine::new().with_plugin("aws", bucket_schema());
        let ctx = engine.context();
        ctx.setup().unwrap();
        let provider = ctx.provider("aws");

        let result: Result<()> = provider
            .scoped(|p| async move {
                p.get_schema(0).await?;
                Err(Error::PluginInstall("simulated".to_string()))
            })
            .await;
        assert!(matches!(result, Err(Error::PluginInstall(_))));
        assert!(engine.started_plugins().is_empty());
        ctx.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_version_constraint_checked_at_configure() {
        let engine = TestEngine::new()
            .with_plugin("aws", bucket_schema().with_version(Version::new(1, 0, 0)));
        let ctx = engine.context();
        ctx.setup().unwrap();

        // Construction accepts any constraint; configure validates it.
        let provider = ctx.provider("aws").with_version(Version::new(2, 0, 0));
        let err = provider.configure(None).await.unwrap_err();
        assert!(matches!(err, Error::PluginInstall(_)));
        assert!(engine.started_plugins().is_empty());
        ctx.teardown().await.unwrap();
    }
}
