//! Device-provider plugin runtime
//!
//! Every smart-home integration implements the [`DevicePlugin`] trait plus
//! whichever optional capability traits it can support. The
//! [`PluginManager`] owns the live instances, their persisted configs, and
//! all routing between them.

pub mod config;
pub mod homebridge;
pub mod manager;
pub mod session;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use config::PluginConfigStore;
pub use homebridge::HomebridgeProvider;
pub use manager::{PluginInfo, PluginManager};
pub use session::SessionCache;

use crate::Result;

/// What kind of plugin this is
///
/// Only device providers are modeled; the variant exists so the persisted
/// format and the API surface stay forward-compatible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PluginKind {
    /// Bridges external devices into the hub
    DeviceProvider,
}

/// Optional capability a plugin may realize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PluginCapability {
    /// Enumerate external devices ([`DeviceDiscovery`])
    DiscoverDevices,
    /// Execute device actions directly ([`ActionExecutor`])
    ExecuteAction,
    /// Report backend reachability ([`ConnectionTestable`])
    TestConnection,
    /// Read back current device state ([`DeviceStateReader`])
    GetDeviceState,
    /// Describe actions declaratively for the manager to execute ([`HttpFallback`])
    GetHttpConfig,
}

/// Persisted per-plugin configuration
///
/// `id` is immutable once created and always matches the plugin id.
/// `settings` is plugin-opaque; the manager never interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Plugin identifier (matches the live instance's id)
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Whether the plugin should be running
    pub enabled: bool,

    /// Free-form plugin settings
    #[serde(default)]
    pub settings: HashMap<String, serde_json::Value>,
}

impl PluginConfig {
    /// Default config created on first registration of a plugin
    #[must_use]
    pub fn disabled(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            enabled: false,
            settings: HashMap::new(),
        }
    }
}

/// Partial configuration update
///
/// There is deliberately no `id` field: a plugin's identity is pinned to the
/// id the update is addressed to and cannot be renamed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfigUpdate {
    /// New display name (existing name kept when omitted)
    #[serde(default)]
    pub name: Option<String>,

    /// New enablement state (existing state kept when omitted)
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Replacement settings (wholesale, not deep-merged)
    #[serde(default)]
    pub settings: Option<HashMap<String, serde_json::Value>>,
}

/// Internal device type a discovered device maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Light,
    Switch,
    Fan,
    Outlet,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Light => write!(f, "light"),
            Self::Switch => write!(f, "switch"),
            Self::Fan => write!(f, "fan"),
            Self::Outlet => write!(f, "outlet"),
        }
    }
}

/// Functions a discovered device supports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// Can be switched on and off
    pub on: bool,

    /// Supports dimming
    pub brightness: bool,

    /// Supports speed levels
    pub speed: bool,
}

/// A normalized external device produced by discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportableDevice {
    /// External unique id, stable across polls
    pub id: String,

    /// Display name reported by the backend
    pub name: String,

    /// Mapped internal device type
    #[serde(rename = "type")]
    pub kind: DeviceKind,

    /// Room the backend places the device in, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,

    /// Supported device functions
    pub capabilities: DeviceCapabilities,

    /// Backend-specific identifiers needed later for action execution.
    /// Opaque to the manager.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Stored association between an internal device and an external one
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBinding {
    /// Plugin that owns the external device
    pub plugin_id: String,

    /// External device id within that plugin
    pub external_device_id: String,

    /// Device type declared at import time
    pub device_type: DeviceKind,

    /// Backend metadata captured at import time
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A single device action to route through a plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionContext {
    /// Which plugin and external device to act on
    pub binding: DeviceBinding,

    /// Desired on/off state
    pub new_state: bool,

    /// Desired fan speed; only honored for fan bindings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_level: Option<u8>,
}

/// Outcome of an action
///
/// Backend failures are reported here, never raised as errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    /// Whether the action was accepted by the backend
    pub success: bool,

    /// The state the device was switched to, on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_state: Option<bool>,

    /// Human-readable failure cause
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResult {
    /// Successful action result
    #[must_use]
    pub const fn ok(new_state: bool) -> Self {
        Self {
            success: true,
            new_state: Some(new_state),
            error: None,
        }
    }

    /// Failed action result with a human-readable cause
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            new_state: None,
            error: Some(error.into()),
        }
    }
}

/// Last-known state of a device
///
/// Callers receive `None` (not a default) when state could not be
/// determined; `None` never means "off".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    /// Whether the device is on
    pub state: bool,

    /// Current speed level, when the device reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed_level: Option<u8>,
}

/// Outcome of a connectivity test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTest {
    /// Whether the backend is reachable and credentials work
    pub success: bool,

    /// Human-readable summary
    pub message: String,
}

impl ConnectionTest {
    /// Successful test result
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    /// Failed test result
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Declarative HTTP request describing a device action
///
/// Escape hatch for plugins that cannot implement [`ActionExecutor`]
/// themselves; the manager performs the actual request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpActionConfig {
    /// Absolute request URL
    pub url: String,

    /// HTTP method name (e.g. "PUT")
    pub method: String,

    /// Request headers
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Optional JSON body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Base trait for device-provider plugins
///
/// Mandatory surface: identity, lifecycle. Optional capabilities are
/// separate traits surfaced through the `as_*` accessors; the manager probes
/// them once at registration and caches the resulting capability set.
#[async_trait]
pub trait DevicePlugin: Send + Sync {
    /// Globally unique plugin identifier
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Short description
    fn description(&self) -> &str {
        ""
    }

    /// What kind of plugin this is
    fn kind(&self) -> PluginKind {
        PluginKind::DeviceProvider
    }

    /// Suggested state-poll interval for external pollers
    ///
    /// A hint only; the manager does not enforce it.
    fn polling_interval(&self) -> Option<Duration> {
        None
    }

    /// Bring the plugin up with the given config
    ///
    /// Must clear any session state left over from a previous run and must
    /// be safe to call again after [`DevicePlugin::shutdown`].
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] when required settings are missing
    /// or invalid.
    async fn initialize(&self, config: &PluginConfig) -> Result<()>;

    /// Release all cached session state
    ///
    /// Safe to call even if `initialize` never succeeded, and safe to call
    /// repeatedly.
    ///
    /// # Errors
    ///
    /// Returns an error if releasing resources fails; callers treat this as
    /// best-effort.
    async fn shutdown(&self) -> Result<()>;

    /// Capability accessor for [`DeviceDiscovery`]
    fn as_discovery(&self) -> Option<&dyn DeviceDiscovery> {
        None
    }

    /// Capability accessor for [`ActionExecutor`]
    fn as_executor(&self) -> Option<&dyn ActionExecutor> {
        None
    }

    /// Capability accessor for [`ConnectionTestable`]
    fn as_testable(&self) -> Option<&dyn ConnectionTestable> {
        None
    }

    /// Capability accessor for [`DeviceStateReader`]
    fn as_state_reader(&self) -> Option<&dyn DeviceStateReader> {
        None
    }

    /// Capability accessor for [`HttpFallback`]
    fn as_http_fallback(&self) -> Option<&dyn HttpFallback> {
        None
    }
}

/// Enumerate the devices an external backend exposes
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    /// Produce a fresh, non-cached snapshot of importable devices
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Upstream`] on transport or auth failure.
    async fn discover_devices(&self) -> Result<Vec<ImportableDevice>>;
}

/// Execute device actions directly against the backend
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Apply the action described by `ctx`
    ///
    /// Backend failures are captured in the result, never raised.
    async fn execute_action(&self, ctx: &ActionContext) -> ActionResult;
}

/// Report whether the backend is reachable with the current settings
#[async_trait]
pub trait ConnectionTestable: Send + Sync {
    /// Check connectivity; all failures are reported in the result
    async fn test_connection(&self) -> ConnectionTest;
}

/// Read back the current state of a single device
#[async_trait]
pub trait DeviceStateReader: Send + Sync {
    /// Fetch the device's state, or `None` when it cannot be determined
    async fn get_device_state(&self, external_id: &str) -> Option<DeviceState>;
}

/// Describe device actions declaratively instead of executing them
///
/// Only the boolean `"on"` / `"off"` actions are routed through this path.
pub trait HttpFallback: Send + Sync {
    /// Build the HTTP request for `action`, or `None` to decline it
    fn get_http_config(&self, binding: &DeviceBinding, action: &str) -> Option<HttpActionConfig>;
}
