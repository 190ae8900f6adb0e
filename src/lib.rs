pub mod math;
pub mod color;
pub mod mesh;
pub mod camera;
pub mod host;
pub mod material;
pub mod transform;
pub mod scratch_pool;
pub mod source;
pub mod baker;
pub mod driver;
pub mod error;
pub mod profiling;

// Headless host used by the CLI and integration tests
pub mod demo;

#[cfg(not(target_arch = "wasm32"))]
pub mod cli;

pub use driver::{FrameContext, RefreshDriver, RefreshReport, RefreshStatus};
pub use error::{ConfigError, RefreshError};
pub use source::{ParticleSource, SourceConfig, SourceId};
