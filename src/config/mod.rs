//! Configuration for tunnel-guard.
//!
//! Settings are resolved once at startup into an immutable [`Settings`]
//! value from, in increasing priority:
//!
//! 1. Built-in defaults
//! 2. `/etc/tunnel-guard/config.toml`
//! 3. The file named by `--settings`
//! 4. Environment variables and CLI flags
//!
//! # Merge Behavior
//!
//! - **Lists** (allowed subnets, extra client args) are **appended**
//! - **Scalars** (binary, timeouts, switches) are **overridden**

mod error;
mod loader;
mod schema;
mod settings;

pub use error::ConfigError;
pub use loader::{SettingsLoader, SYSTEM_SETTINGS_PATH};
pub use schema::{HealthSection, KillswitchSection, SettingsFile, SupervisorSection, TunnelSection};
pub use settings::{Settings, DEFAULT_TUNNEL_BINARY};
