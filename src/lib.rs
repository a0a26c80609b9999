//! Hearth Hub - device-provider plugin runtime for smart home wall panels
//!
//! This library provides the core of the Hearth hub: the contract every
//! smart-home integration implements, the manager that loads, configures,
//! and routes work to plugins, and the Homebridge reference provider.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Consumers                         │
//! │   HTTP API  │  State Poller  │  Scene Engine  │ ... │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Plugin Manager                       │
//! │   Registry  │  Lifecycle  │  Routing  │  Configs    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Device Providers                        │
//! │   Homebridge  │  (future integrations)              │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Consumers only ever talk to the [`PluginManager`]; the manager dispatches
//! to a specific plugin; a plugin owns all knowledge of its external
//! backend's wire format.

pub mod error;
pub mod plugins;

pub use error::{Error, Result};
pub use plugins::{
    ActionContext, ActionExecutor, ActionResult, ConnectionTest, ConnectionTestable,
    DeviceBinding, DeviceCapabilities, DeviceDiscovery, DeviceKind, DevicePlugin, DeviceState,
    DeviceStateReader, HomebridgeProvider, HttpActionConfig, HttpFallback, ImportableDevice,
    PluginCapability, PluginConfig, PluginConfigStore, PluginConfigUpdate, PluginInfo,
    PluginKind, PluginManager, SessionCache,
};
