//! Name-keyed registries for providers and platforms.

mod platform;
mod provider;

pub use platform::{PlatformInfo, PlatformRegistry};
pub use provider::{ProviderInfo, ProviderRegistry};
