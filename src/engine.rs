//! External collaborator seams: the plugin process boundary and the plugin
//! installation boundary.
//!
//! The host never talks to a provider plugin process directly; it goes
//! through a [`PluginEngine`] capability that starts/stops processes and
//! carries the RPC set keyed by [`SessionHandle`]. The wire format and
//! transport behind the engine are deliberately unspecified here. Likewise,
//! plugin acquisition goes through a [`PluginInstaller`].
//!
//! Engine implementations must surface a crashed plugin process mid-RPC as
//! [`crate::Error::Provider`] rather than hanging the caller. Blocking
//! transports belong inside the implementation (e.g. behind
//! `tokio::task::spawn_blocking`), never in the session state machine.

use std::path::PathBuf;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::urn::Urn;
use crate::value::{
    CheckFailure, CreateResult, DiffResult, PropertyMap, ReadResult, UpdateResult,
};

/// Opaque identity of one running plugin process session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle(u64);

impl SessionHandle {
    /// Wrap a raw engine-assigned id.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw engine-assigned id.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Install metadata for a plugin, as reported by the engine or installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin package name (e.g. a cloud name).
    #[serde(rename = "Name")]
    pub name: String,
    /// Plugin kind (e.g. `resource`).
    #[serde(rename = "Kind")]
    pub kind: String,
    /// Declared version, if any.
    #[serde(rename = "Version")]
    pub version: Option<Version>,
    /// On-disk path of the plugin binary.
    #[serde(rename = "Path")]
    pub path: PathBuf,
    /// When the plugin was installed (RFC 3339), if known.
    #[serde(rename = "InstallTime")]
    pub install_time: Option<String>,
    /// When the plugin was last used (RFC 3339), if known.
    #[serde(rename = "LastUsedTime")]
    pub last_used_time: Option<String>,
    /// Where the plugin was downloaded from; may be empty.
    #[serde(rename = "PluginDownloadURL")]
    pub download_url: String,
    /// On-disk size in bytes, when computed.
    #[serde(rename = "Size")]
    pub size: i64,
}

/// Capability for starting, stopping, and calling provider plugin processes.
///
/// One handle corresponds to one running process. All property bags cross
/// this boundary as [`PropertyMap`]s with unknown sentinels encoded per
/// [`crate::value`].
#[async_trait::async_trait]
pub trait PluginEngine: Send + Sync + 'static {
    /// Start the plugin process for `name` (optionally pinned to `version`)
    /// and configure it with `config`. Returns the session handle all
    /// subsequent RPCs are keyed by.
    async fn start(
        &self,
        name: &str,
        version: Option<&Version>,
        config: &PropertyMap,
    ) -> Result<SessionHandle>;

    /// Stop the plugin process and release its OS resources.
    async fn stop(&self, session: SessionHandle) -> Result<()>;

    /// Install metadata for the plugin behind this session.
    async fn get_plugin_info(&self, session: SessionHandle) -> Result<PluginInfo>;

    /// The raw schema document bytes for the requested schema version
    /// (0 = default/latest known to the plugin). Fails with
    /// [`crate::Error::Schema`] for unsupported versions.
    async fn get_schema(&self, session: SessionHandle, version: u32) -> Result<Vec<u8>>;

    /// Validate a provider-level configuration transition.
    async fn check_config(
        &self,
        session: SessionHandle,
        urn: &Urn,
        olds: &PropertyMap,
        news: &PropertyMap,
        allow_unknowns: bool,
    ) -> Result<(PropertyMap, Vec<CheckFailure>)>;

    /// Compute the impact of a hypothetical provider configuration change.
    #[allow(clippy::too_many_arguments)]
    async fn diff_config(
        &self,
        session: SessionHandle,
        urn: &Urn,
        olds: &PropertyMap,
        news: &PropertyMap,
        allow_unknowns: bool,
        ignore_changes: &[String],
    ) -> Result<DiffResult>;

    /// Validate a resource property bag against its type's schema, filling
    /// defaults for omitted optional properties.
    async fn check(
        &self,
        session: SessionHandle,
        urn: &Urn,
        olds: &PropertyMap,
        news: &PropertyMap,
        allow_unknowns: bool,
    ) -> Result<(PropertyMap, Vec<CheckFailure>)>;

    /// Compare two already-checked property bags for an existing instance.
    #[allow(clippy::too_many_arguments)]
    async fn diff(
        &self,
        session: SessionHandle,
        urn: &Urn,
        id: &str,
        olds: &PropertyMap,
        news: &PropertyMap,
        allow_unknowns: bool,
        ignore_changes: &[String],
    ) -> Result<DiffResult>;

    /// Allocate a new resource instance. With `preview` the engine must
    /// validate and predict without real-world side effects, assigning an
    /// empty id.
    async fn create(
        &self,
        session: SessionHandle,
        urn: &Urn,
        news: &PropertyMap,
        preview: bool,
    ) -> Result<CreateResult>;

    /// Fetch live state for an existing instance. A missing resource yields
    /// empty outputs, not an error.
    async fn read(
        &self,
        session: SessionHandle,
        urn: &Urn,
        id: &str,
        inputs: &PropertyMap,
        state: &PropertyMap,
    ) -> Result<ReadResult>;

    /// Apply an in-place update to an existing instance.
    async fn update(
        &self,
        session: SessionHandle,
        urn: &Urn,
        id: &str,
        olds: &PropertyMap,
        news: &PropertyMap,
    ) -> Result<UpdateResult>;

    /// Destroy an existing instance. Returns the status code (0 = success).
    async fn delete(
        &self,
        session: SessionHandle,
        urn: &Urn,
        id: &str,
        news: &PropertyMap,
    ) -> Result<i32>;

    /// Call a provider-defined function not tied to a resource instance.
    /// Argument-validation failures surface as
    /// [`crate::Error::InvocationValidation`].
    async fn invoke(
        &self,
        session: SessionHandle,
        member: &str,
        args: &PropertyMap,
    ) -> Result<PropertyMap>;

    /// Best-effort request that the plugin abort in-flight work. Must not
    /// block waiting for the abort, and must not fail for an idle session.
    async fn signal_cancellation(&self, session: SessionHandle) -> Result<()>;
}

/// Capability for making plugins available on disk.
#[async_trait::async_trait]
pub trait PluginInstaller: Send + Sync + 'static {
    /// Ensure a plugin of the given kind/name/version is installed, returning
    /// its on-disk path. `version = None` selects the latest available;
    /// `exact` requires a version match rather than greater-or-equal;
    /// `reinstall` forces reinstallation and ignores `exact`.
    async fn install(
        &self,
        kind: &str,
        name: &str,
        version: Option<&Version>,
        reinstall: bool,
        exact: bool,
    ) -> Result<PathBuf>;

    /// Metadata for the plugins currently available, optionally filtered by
    /// kind.
    async fn list_available(&self, kind: Option<&str>) -> Result<Vec<PluginInfo>>;
}
