//! Homebridge device provider
//!
//! Talks to the Homebridge UI REST API: bearer-token auth with lazy login,
//! accessory discovery enriched with the room layout, characteristic
//! mutation for actions, and state read-back.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::session::SessionCache;
use super::{
    ActionContext, ActionExecutor, ActionResult, ConnectionTest, ConnectionTestable,
    DeviceCapabilities, DeviceDiscovery, DeviceKind, DevicePlugin, DeviceState,
    DeviceStateReader, ImportableDevice, PluginConfig,
};
use crate::{Error, Result};

/// Bound on every outbound call so a hung backend cannot stall the hub
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Suggested state-poll cadence for this backend
const POLLING_INTERVAL: Duration = Duration::from_secs(10);

/// HomeKit characteristic type tags
const CHAR_ON: &str = "On";
const CHAR_BRIGHTNESS: &str = "Brightness";
const CHAR_ROTATION_SPEED: &str = "RotationSpeed";

/// Homebridge-backed device provider
pub struct HomebridgeProvider {
    client: reqwest::Client,
    settings: RwLock<Option<ProviderSettings>>,
    session: SessionCache,
}

/// Validated connection settings, present between initialize and shutdown
#[derive(Debug, Clone)]
struct ProviderSettings {
    base_url: String,
    username: String,
    password: String,
}

impl ProviderSettings {
    /// Build an API endpoint URL
    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }
}

/// Login request body
#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// Login response
#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    /// Relative token lifetime in seconds
    expires_in: i64,
}

/// An accessory record from `/api/accessories`
#[derive(Debug, Deserialize)]
struct Accessory {
    #[serde(rename = "uniqueId")]
    unique_id: String,
    #[serde(rename = "serviceName", default)]
    service_name: Option<String>,
    #[serde(rename = "type")]
    service_type: String,
    #[serde(rename = "serviceCharacteristics", default)]
    characteristics: Vec<Characteristic>,
    #[serde(default)]
    aid: Option<i64>,
    #[serde(default)]
    iid: Option<i64>,
    #[serde(default)]
    uuid: Option<String>,
}

/// A characteristic on an accessory
#[derive(Debug, Deserialize)]
struct Characteristic {
    #[serde(rename = "type")]
    characteristic_type: String,
    #[serde(default)]
    value: Option<serde_json::Value>,
    #[serde(rename = "canWrite", default)]
    can_write: bool,
}

/// Room layout response from `/api/accessories/layout`
#[derive(Debug, Deserialize)]
struct LayoutResponse {
    #[serde(default)]
    rooms: Vec<LayoutRoom>,
}

/// A room in the layout
#[derive(Debug, Deserialize)]
struct LayoutRoom {
    name: String,
    #[serde(default)]
    services: Vec<LayoutService>,
}

/// A service placed in a room
#[derive(Debug, Deserialize)]
struct LayoutService {
    #[serde(rename = "uniqueId")]
    unique_id: String,
}

/// Characteristic mutation request
#[derive(Debug, Serialize)]
struct CharacteristicUpdate<'a> {
    #[serde(rename = "characteristicType")]
    characteristic_type: &'a str,
    value: serde_json::Value,
}

impl HomebridgeProvider {
    /// Create an uninitialized provider
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized.
    #[must_use]
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            settings: RwLock::new(None),
            session: SessionCache::new(),
        }
    }

    /// Current settings, or a config error before initialize
    async fn settings(&self) -> Result<ProviderSettings> {
        self.settings
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Config("homebridge provider is not initialized".to_string()))
    }

    /// Exchange credentials for a bearer token
    async fn login(&self, settings: &ProviderSettings) -> Result<(String, i64)> {
        let request = LoginRequest {
            username: &settings.username,
            password: &settings.password,
        };

        let response = self
            .client
            .post(settings.api_url("/auth/login"))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("homebridge login request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "homebridge login failed: {status} - {body}"
            )));
        }

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("homebridge login parse error: {e}")))?;

        tracing::debug!(base_url = %settings.base_url, "homebridge authenticated");
        Ok((login.access_token, login.expires_in))
    }

    /// Valid bearer token, refreshed through the session cache when needed
    async fn token(&self, settings: &ProviderSettings) -> Result<String> {
        self.session.token(|| self.login(settings)).await
    }

    /// Fetch the flat accessory list
    async fn fetch_accessories(
        &self,
        settings: &ProviderSettings,
        token: &str,
    ) -> Result<Vec<Accessory>> {
        let response = self
            .client
            .get(settings.api_url("/accessories"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("homebridge accessories request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "homebridge accessories listing failed: {status} - {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("homebridge accessories parse error: {e}")))
    }

    /// Fetch the room layout as a map of accessory unique id to room name
    async fn fetch_room_layout(
        &self,
        settings: &ProviderSettings,
        token: &str,
    ) -> Result<HashMap<String, String>> {
        let response = self
            .client
            .get(settings.api_url("/accessories/layout"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("homebridge layout request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upstream(format!(
                "homebridge layout fetch failed: {status} - {body}"
            )));
        }

        let layout: LayoutResponse = response
            .json()
            .await
            .map_err(|e| Error::Upstream(format!("homebridge layout parse error: {e}")))?;

        let mut rooms = HashMap::new();
        for room in layout.rooms {
            let name = room.name;
            for service in room.services {
                rooms.insert(service.unique_id, name.clone());
            }
        }
        Ok(rooms)
    }
}

impl Default for HomebridgeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DevicePlugin for HomebridgeProvider {
    fn id(&self) -> &str {
        "homebridge"
    }

    fn name(&self) -> &str {
        "Homebridge"
    }

    fn description(&self) -> &str {
        "Devices exposed by a Homebridge instance"
    }

    fn polling_interval(&self) -> Option<Duration> {
        Some(POLLING_INTERVAL)
    }

    async fn initialize(&self, config: &PluginConfig) -> Result<()> {
        let server_url = required_setting(config, "server_url")?;
        let username = required_setting(config, "username")?;
        let password = required_setting(config, "password")?;

        // A previous session must never survive re-initialization
        self.session.clear().await;

        *self.settings.write().await = Some(ProviderSettings {
            base_url: server_url.trim_end_matches('/').to_string(),
            username,
            password,
        });

        tracing::info!("homebridge provider initialized");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.session.clear().await;
        *self.settings.write().await = None;
        tracing::info!("homebridge provider shut down");
        Ok(())
    }

    fn as_discovery(&self) -> Option<&dyn DeviceDiscovery> {
        Some(self)
    }

    fn as_executor(&self) -> Option<&dyn ActionExecutor> {
        Some(self)
    }

    fn as_testable(&self) -> Option<&dyn ConnectionTestable> {
        Some(self)
    }

    fn as_state_reader(&self) -> Option<&dyn DeviceStateReader> {
        Some(self)
    }
}

#[async_trait]
impl DeviceDiscovery for HomebridgeProvider {
    async fn discover_devices(&self) -> Result<Vec<ImportableDevice>> {
        let settings = self.settings().await?;
        let token = self.token(&settings).await?;
        let accessories = self.fetch_accessories(&settings, &token).await?;

        // Room layout is enrichment only; discovery proceeds without it
        let rooms = match self.fetch_room_layout(&settings, &token).await {
            Ok(rooms) => rooms,
            Err(e) => {
                tracing::debug!(error = %e, "homebridge layout unavailable, importing without rooms");
                HashMap::new()
            }
        };

        let devices: Vec<ImportableDevice> = accessories
            .into_iter()
            .filter_map(|accessory| map_accessory(accessory, &rooms))
            .collect();

        tracing::debug!(count = devices.len(), "homebridge discovery complete");
        Ok(devices)
    }
}

#[async_trait]
impl ActionExecutor for HomebridgeProvider {
    async fn execute_action(&self, ctx: &ActionContext) -> ActionResult {
        let settings = match self.settings().await {
            Ok(settings) => settings,
            Err(e) => return ActionResult::failed(e.to_string()),
        };
        let token = match self.token(&settings).await {
            Ok(token) => token,
            Err(e) => return ActionResult::failed(e.to_string()),
        };

        // Speed and on/off are mutually exclusive per call; the speed level
        // wins only when the binding is declared as a fan
        let (characteristic_type, value) = match ctx.speed_level {
            Some(speed) if ctx.binding.device_type == DeviceKind::Fan => {
                (CHAR_ROTATION_SPEED, serde_json::json!(speed))
            }
            _ => (CHAR_ON, serde_json::json!(i32::from(ctx.new_state))),
        };

        let url = settings.api_url(&format!(
            "/accessories/{}",
            ctx.binding.external_device_id
        ));
        let request = CharacteristicUpdate {
            characteristic_type,
            value,
        };

        match self
            .client
            .put(url)
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => ActionResult::ok(ctx.new_state),
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                ActionResult::failed(format!(
                    "homebridge rejected the update: {status} - {body}"
                ))
            }
            Err(e) => ActionResult::failed(format!("homebridge update failed: {e}")),
        }
    }
}

#[async_trait]
impl ConnectionTestable for HomebridgeProvider {
    async fn test_connection(&self) -> ConnectionTest {
        let settings = match self.settings().await {
            Ok(settings) => settings,
            Err(e) => return ConnectionTest::failed(e.to_string()),
        };
        let token = match self.token(&settings).await {
            Ok(token) => token,
            Err(e) => return ConnectionTest::failed(format!("authentication failed: {e}")),
        };

        match self.fetch_accessories(&settings, &token).await {
            Ok(accessories) => ConnectionTest::ok(format!(
                "connected to {}, {} accessories visible",
                settings.base_url,
                accessories.len()
            )),
            Err(e) => ConnectionTest::failed(format!("accessory listing failed: {e}")),
        }
    }
}

#[async_trait]
impl DeviceStateReader for HomebridgeProvider {
    async fn get_device_state(&self, external_id: &str) -> Option<DeviceState> {
        let settings = self.settings().await.ok()?;
        let token = self.token(&settings).await.ok()?;

        let url = settings.api_url(&format!("/accessories/{external_id}"));
        let response = self.client.get(url).bearer_auth(&token).send().await.ok()?;
        if !response.status().is_success() {
            tracing::debug!(external_id, status = %response.status(), "homebridge state fetch failed");
            return None;
        }

        let accessory: Accessory = response.json().await.ok()?;
        read_state(&accessory)
    }
}

/// Extract a required, non-empty string setting
fn required_setting(config: &PluginConfig, key: &str) -> Result<String> {
    config
        .settings
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| Error::Config(format!("homebridge: missing required setting `{key}`")))
}

/// Map an accessory to an importable device
///
/// Unrecognized service types are dropped, and so is anything without a
/// writable On characteristic: the hub cannot control a device it cannot
/// switch.
fn map_accessory(
    accessory: Accessory,
    rooms: &HashMap<String, String>,
) -> Option<ImportableDevice> {
    let kind = map_service_type(&accessory.service_type)?;
    let capabilities = derive_capabilities(&accessory.characteristics);
    if !capabilities.on {
        return None;
    }

    let mut metadata = HashMap::new();
    metadata.insert(
        "uniqueId".to_string(),
        serde_json::json!(accessory.unique_id.clone()),
    );
    if let Some(aid) = accessory.aid {
        metadata.insert("aid".to_string(), serde_json::json!(aid));
    }
    if let Some(iid) = accessory.iid {
        metadata.insert("iid".to_string(), serde_json::json!(iid));
    }
    if let Some(uuid) = &accessory.uuid {
        metadata.insert("uuid".to_string(), serde_json::json!(uuid));
    }

    Some(ImportableDevice {
        room: rooms.get(&accessory.unique_id).cloned(),
        name: accessory
            .service_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| accessory.service_type.clone()),
        id: accessory.unique_id,
        kind,
        capabilities,
        metadata,
    })
}

/// Map a HomeKit service type to an internal device type
///
/// Case-insensitive substring match in fixed priority order.
fn map_service_type(service_type: &str) -> Option<DeviceKind> {
    let lower = service_type.to_lowercase();
    if lower.contains("light") {
        Some(DeviceKind::Light)
    } else if lower.contains("switch") {
        Some(DeviceKind::Switch)
    } else if lower.contains("fan") {
        Some(DeviceKind::Fan)
    } else if lower.contains("outlet") {
        Some(DeviceKind::Outlet)
    } else {
        None
    }
}

/// Derive device capabilities from writable characteristics
fn derive_capabilities(characteristics: &[Characteristic]) -> DeviceCapabilities {
    let mut capabilities = DeviceCapabilities::default();
    for characteristic in characteristics {
        if !characteristic.can_write {
            continue;
        }
        match characteristic.characteristic_type.as_str() {
            CHAR_ON => capabilities.on = true,
            CHAR_BRIGHTNESS => capabilities.brightness = true,
            CHAR_ROTATION_SPEED => capabilities.speed = true,
            _ => {}
        }
    }
    capabilities
}

/// Read device state from an accessory's characteristic values
///
/// A missing On characteristic makes the on/off state unknowable, so the
/// whole read is `None` rather than a guessed default.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn read_state(accessory: &Accessory) -> Option<DeviceState> {
    let mut on = None;
    let mut speed = None;

    for characteristic in &accessory.characteristics {
        match characteristic.characteristic_type.as_str() {
            CHAR_ON => on = characteristic.value.as_ref().map(coerce_bool),
            CHAR_ROTATION_SPEED => {
                speed = characteristic
                    .value
                    .as_ref()
                    .and_then(serde_json::Value::as_f64)
                    .map(|value| value.round() as u8);
            }
            _ => {}
        }
    }

    on.map(|state| DeviceState {
        state,
        speed_level: speed,
    })
}

/// Coerce the truthy encodings Homebridge emits into a bool
///
/// Accepts `1`, `true`, `"1"` and `"true"`; everything else is off.
fn coerce_bool(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => {
            matches!(n.as_f64(), Some(v) if (v - 1.0).abs() < f64::EPSILON)
        }
        serde_json::Value::String(s) => matches!(s.as_str(), "1" | "true"),
        _ => false,
    }
}
