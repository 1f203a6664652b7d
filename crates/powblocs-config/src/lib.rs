//! PowBlocs Config
//!
//! Serializable configuration for the execution bridge. Every field has a
//! default, so an empty JSON object (or no file at all) is a valid config.
//!
//! ```json
//! {
//!   "stop_timeout_ms": 2000,
//!   "host": {
//!     "program": "deno",
//!     "args": ["run", "--quiet"],
//!     "script_extension": "ts"
//!   }
//! }
//! ```

mod bridge;
mod error;
mod host;

pub use bridge::BridgeConfig;
pub use error::ConfigError;
pub use host::HostConfig;
