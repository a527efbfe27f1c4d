//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → cli.rs overrides (flags / environment)
//!     → EdgeConfig (validated, immutable)
//!     → shared by reference with startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow running without a file
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, read_config, ConfigError};
pub use schema::{
    AcmeConfig, EdgeConfig, ImportConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    ProxyTargetConfig, ServiceConfig, SiteConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
