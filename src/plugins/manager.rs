//! Plugin registry and lifecycle manager
//!
//! Owns the live plugin instances and their persisted configs, and routes
//! all work to them: bulk lifecycle at startup and shutdown, device
//! discovery, action execution with a generic HTTP fallback, connection
//! tests, and state queries.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

use super::config::PluginConfigStore;
use super::{
    ActionContext, ActionResult, ConnectionTest, DevicePlugin, DeviceState, HttpActionConfig,
    ImportableDevice, PluginCapability, PluginConfig, PluginConfigUpdate, PluginKind,
};
use crate::{Error, Result};

/// Bound on fallback HTTP actions so a hung backend cannot stall the hub
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Metadata and status of a registered plugin
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInfo {
    /// Plugin identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Short description
    pub description: String,

    /// Plugin kind
    pub kind: PluginKind,

    /// Whether the plugin is currently enabled
    pub enabled: bool,

    /// Capabilities the instance realizes
    pub capabilities: Vec<PluginCapability>,

    /// Suggested state-poll interval in seconds, when the plugin hints one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub polling_interval_secs: Option<u64>,
}

/// A live plugin instance with its capability set probed at registration
struct RegisteredPlugin {
    plugin: Arc<dyn DevicePlugin>,
    capabilities: HashSet<PluginCapability>,
}

/// Registry of live plugin instances
///
/// Constructed once at process start and threaded to all consumers. Lock
/// order is always `plugins` before `configs`.
pub struct PluginManager {
    plugins: RwLock<HashMap<String, RegisteredPlugin>>,
    configs: RwLock<HashMap<String, PluginConfig>>,
    store: PluginConfigStore,
    http: reqwest::Client,
}

impl PluginManager {
    /// Create a manager persisting configs through the given store
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized.
    #[must_use]
    pub fn new(store: PluginConfigStore) -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Self {
            plugins: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
            store,
            http,
        }
    }

    /// Register a plugin instance
    ///
    /// Probes and caches the instance's capability set. A first registration
    /// creates a disabled default config; re-registering with the same id
    /// replaces the instance but keeps the existing config.
    pub async fn register_plugin(&self, plugin: Arc<dyn DevicePlugin>) {
        let id = plugin.id().to_string();
        let name = plugin.name().to_string();
        let capabilities = probe_capabilities(plugin.as_ref());

        tracing::info!(
            plugin_id = %id,
            name = %name,
            capabilities = capabilities.len(),
            "registering plugin"
        );

        let mut plugins = self.plugins.write().await;
        let mut configs = self.configs.write().await;

        plugins.insert(
            id.clone(),
            RegisteredPlugin {
                plugin,
                capabilities,
            },
        );

        if !configs.contains_key(&id) {
            // A config persisted by an earlier run wins over the default;
            // pull the whole store in so the rewrite below drops nothing
            if let Ok(stored) = self.store.load() {
                for (stored_id, config) in stored {
                    configs.entry(stored_id).or_insert(config);
                }
            }
        }

        if !configs.contains_key(&id) {
            configs.insert(id.clone(), PluginConfig::disabled(&id, &name));
            self.persist(&configs);
        }
    }

    /// Load persisted configs and initialize every enabled plugin
    ///
    /// A single plugin's initialization failure is logged and isolated;
    /// startup proceeds regardless.
    pub async fn initialize_all(&self) {
        match self.store.load() {
            Ok(loaded) => {
                let mut configs = self.configs.write().await;
                for (id, config) in loaded {
                    configs.insert(id, config);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to load plugin configs, using defaults");
            }
        }

        let plugins = self.plugins.read().await;
        let configs = self.configs.read().await;

        for (id, registered) in plugins.iter() {
            let Some(config) = configs.get(id) else {
                continue;
            };
            if !config.enabled {
                continue;
            }

            match registered.plugin.initialize(config).await {
                Ok(()) => tracing::info!(plugin_id = %id, "plugin initialized"),
                Err(e) => {
                    tracing::warn!(plugin_id = %id, error = %e, "plugin initialization failed");
                }
            }
        }
    }

    /// Shut down every registered plugin, best-effort
    pub async fn shutdown_all(&self) {
        let plugins = self.plugins.read().await;
        for (id, registered) in plugins.iter() {
            if let Err(e) = registered.plugin.shutdown().await {
                tracing::warn!(plugin_id = %id, error = %e, "plugin shutdown failed");
            }
        }
    }

    /// Metadata and status for all registered plugins, sorted by id
    pub async fn plugin_infos(&self) -> Vec<PluginInfo> {
        let plugins = self.plugins.read().await;
        let configs = self.configs.read().await;

        let mut infos: Vec<PluginInfo> = plugins
            .iter()
            .map(|(id, registered)| {
                let plugin = &registered.plugin;
                let mut capabilities: Vec<PluginCapability> =
                    registered.capabilities.iter().copied().collect();
                capabilities.sort_unstable();

                PluginInfo {
                    id: id.clone(),
                    name: plugin.name().to_string(),
                    description: plugin.description().to_string(),
                    kind: plugin.kind(),
                    enabled: configs.get(id).is_some_and(|c| c.enabled),
                    capabilities,
                    polling_interval_secs: plugin.polling_interval().map(|d| d.as_secs()),
                }
            })
            .collect();

        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Persisted config for a plugin, if any
    pub async fn plugin_config(&self, plugin_id: &str) -> Option<PluginConfig> {
        self.configs.read().await.get(plugin_id).cloned()
    }

    /// Apply a partial config update and the lifecycle transition it implies
    ///
    /// The merged config keeps the plugin's identity (`id` cannot be
    /// renamed), defaults `name` and `enabled` to their existing values, and
    /// replaces `settings` wholesale when present. It is persisted
    /// immediately, then exactly one transition runs based on the diff:
    /// enabling initializes the plugin, disabling shuts it down, and a
    /// settings change while enabled shuts down and re-initializes so no
    /// stale session survives.
    ///
    /// # Errors
    ///
    /// Returns the initialization error when enabling fails; the config is
    /// still persisted. Transition failures on the other paths are logged,
    /// not propagated.
    pub async fn set_plugin_config(
        &self,
        plugin_id: &str,
        update: PluginConfigUpdate,
    ) -> Result<PluginConfig> {
        let plugins = self.plugins.read().await;
        let mut configs = self.configs.write().await;

        let existing = configs.get(plugin_id);
        let was_enabled = existing.is_some_and(|c| c.enabled);
        let previous_settings = existing.map(|c| c.settings.clone()).unwrap_or_default();
        let previous_name = existing.map(|c| c.name.clone());

        let merged = PluginConfig {
            id: plugin_id.to_string(),
            name: update
                .name
                .or(previous_name)
                .unwrap_or_else(|| plugin_id.to_string()),
            enabled: update.enabled.unwrap_or(was_enabled),
            settings: update.settings.unwrap_or_else(|| previous_settings.clone()),
        };

        configs.insert(plugin_id.to_string(), merged.clone());
        self.persist(&configs);

        let Some(registered) = plugins.get(plugin_id) else {
            // Config accepted for a plugin that is not currently registered
            return Ok(merged);
        };
        let plugin = &registered.plugin;

        if merged.enabled && !was_enabled {
            plugin.initialize(&merged).await?;
            tracing::info!(plugin_id, "plugin enabled");
        } else if !merged.enabled && was_enabled {
            if let Err(e) = plugin.shutdown().await {
                tracing::warn!(plugin_id, error = %e, "plugin shutdown failed");
            }
            tracing::info!(plugin_id, "plugin disabled");
        } else if merged.enabled && merged.settings != previous_settings {
            // Full session reset so the old settings' session cannot leak
            if let Err(e) = plugin.shutdown().await {
                tracing::warn!(plugin_id, error = %e, "plugin shutdown failed");
            }
            if let Err(e) = plugin.initialize(&merged).await {
                tracing::warn!(plugin_id, error = %e, "plugin re-initialization failed");
            } else {
                tracing::info!(plugin_id, "plugin re-initialized with new settings");
            }
        }

        Ok(merged)
    }

    /// Run discovery on an enabled plugin
    ///
    /// # Errors
    ///
    /// Returns [`Error::Routing`] for an unknown, disabled, or
    /// discovery-less plugin, and [`Error::Upstream`] when the backend
    /// fails.
    pub async fn discover_devices(&self, plugin_id: &str) -> Result<Vec<ImportableDevice>> {
        let plugins = self.plugins.read().await;
        let registered = plugins
            .get(plugin_id)
            .ok_or_else(|| Error::Routing(format!("no plugin registered with id `{plugin_id}`")))?;

        if !self.is_enabled(plugin_id).await {
            return Err(Error::Routing(format!("plugin `{plugin_id}` is disabled")));
        }

        let discovery = registered.plugin.as_discovery().ok_or_else(|| {
            Error::Routing(format!("plugin `{plugin_id}` does not support discovery"))
        })?;

        discovery.discover_devices().await
    }

    /// Route a device action to the plugin named in its binding
    ///
    /// Plugins implementing [`super::ActionExecutor`] handle the action
    /// themselves. Plugins exposing only [`super::HttpFallback`] have the
    /// manager perform the declarative request for the boolean action; the
    /// fallback path does not support speed levels, so a context carrying
    /// one still routes as plain on/off.
    pub async fn execute_action(&self, ctx: &ActionContext) -> ActionResult {
        let plugin_id = &ctx.binding.plugin_id;

        let plugins = self.plugins.read().await;
        let Some(registered) = plugins.get(plugin_id) else {
            return ActionResult::failed(format!("no plugin registered with id `{plugin_id}`"));
        };

        if !self.is_enabled(plugin_id).await {
            return ActionResult::failed(format!("plugin `{plugin_id}` is disabled"));
        }

        if registered.capabilities.contains(&PluginCapability::ExecuteAction) {
            if let Some(executor) = registered.plugin.as_executor() {
                return executor.execute_action(ctx).await;
            }
        }

        if registered.capabilities.contains(&PluginCapability::GetHttpConfig) {
            if let Some(fallback) = registered.plugin.as_http_fallback() {
                let action = if ctx.new_state { "on" } else { "off" };
                if ctx.speed_level.is_some() {
                    tracing::debug!(
                        plugin_id = %plugin_id,
                        "http fallback does not support speed levels, sending on/off"
                    );
                }

                let Some(request) = fallback.get_http_config(&ctx.binding, action) else {
                    return ActionResult::failed(format!(
                        "plugin `{plugin_id}` declined action `{action}`"
                    ));
                };
                return self.execute_http_action(&request, ctx.new_state).await;
            }
        }

        ActionResult::failed(format!("plugin `{plugin_id}` does not support actions"))
    }

    /// Test a plugin's backend connectivity
    ///
    /// A disabled plugin is brought up only for the duration of the test
    /// and shut down afterwards regardless of the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Routing`] for an unknown or test-less plugin. Test
    /// failures themselves are reported in the result, never as errors.
    pub async fn test_connection(&self, plugin_id: &str) -> Result<ConnectionTest> {
        let plugins = self.plugins.read().await;
        let registered = plugins
            .get(plugin_id)
            .ok_or_else(|| Error::Routing(format!("no plugin registered with id `{plugin_id}`")))?;
        let plugin = &registered.plugin;

        let Some(testable) = plugin.as_testable() else {
            return Err(Error::Routing(format!(
                "plugin `{plugin_id}` does not support connection tests"
            )));
        };

        let config = {
            let configs = self.configs.read().await;
            configs.get(plugin_id).cloned()
        };

        if config.as_ref().is_some_and(|c| c.enabled) {
            return Ok(testable.test_connection().await);
        }

        let Some(config) = config else {
            return Err(Error::Routing(format!(
                "no configuration for plugin `{plugin_id}`"
            )));
        };

        // Temporary session for the test only; shut down on every path
        let result = match plugin.initialize(&config).await {
            Ok(()) => testable.test_connection().await,
            Err(e) => ConnectionTest::failed(format!("initialization failed: {e}")),
        };
        if let Err(e) = plugin.shutdown().await {
            tracing::warn!(plugin_id, error = %e, "shutdown after connection test failed");
        }

        Ok(result)
    }

    /// Last-known state of a device, or `None` when it cannot be determined
    ///
    /// `None` covers an unregistered or disabled plugin, a missing
    /// capability, and an underlying read failure; it never means "off".
    pub async fn get_device_state(
        &self,
        plugin_id: &str,
        external_id: &str,
    ) -> Option<DeviceState> {
        let plugins = self.plugins.read().await;
        let registered = plugins.get(plugin_id)?;

        if !self.is_enabled(plugin_id).await {
            return None;
        }

        registered
            .plugin
            .as_state_reader()?
            .get_device_state(external_id)
            .await
    }

    /// Execute a declarative HTTP action on behalf of a fallback plugin
    async fn execute_http_action(
        &self,
        request: &HttpActionConfig,
        new_state: bool,
    ) -> ActionResult {
        let Ok(method) = reqwest::Method::from_bytes(request.method.as_bytes()) else {
            return ActionResult::failed(format!(
                "invalid method `{}` in http action",
                request.method
            ));
        };

        let mut req = self.http.request(method, request.url.as_str());
        for (name, value) in &request.headers {
            req = req.header(name, value);
        }
        if let Some(body) = &request.body {
            req = req.json(body);
        }

        match req.send().await {
            Ok(response) if response.status().is_success() => ActionResult::ok(new_state),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                ActionResult::failed(format!("http action failed: {status} - {body}"))
            }
            Err(e) => ActionResult::failed(format!("http action failed: {e}")),
        }
    }

    /// Whether a plugin's config exists and is enabled
    async fn is_enabled(&self, plugin_id: &str) -> bool {
        self.configs
            .read()
            .await
            .get(plugin_id)
            .is_some_and(|c| c.enabled)
    }

    /// Persist configs, logging instead of failing the caller's operation
    fn persist(&self, configs: &HashMap<String, PluginConfig>) {
        if let Err(e) = self.store.save(configs) {
            tracing::warn!(error = %e, "failed to persist plugin configs");
        }
    }
}

/// Probe which capability traits a plugin instance realizes
fn probe_capabilities(plugin: &dyn DevicePlugin) -> HashSet<PluginCapability> {
    let mut capabilities = HashSet::new();
    if plugin.as_discovery().is_some() {
        capabilities.insert(PluginCapability::DiscoverDevices);
    }
    if plugin.as_executor().is_some() {
        capabilities.insert(PluginCapability::ExecuteAction);
    }
    if plugin.as_testable().is_some() {
        capabilities.insert(PluginCapability::TestConnection);
    }
    if plugin.as_state_reader().is_some() {
        capabilities.insert(PluginCapability::GetDeviceState);
    }
    if plugin.as_http_fallback().is_some() {
        capabilities.insert(PluginCapability::GetHttpConfig);
    }
    capabilities
}
