//! Plugins shipped with the framework.

pub mod chat;
pub mod echo;

pub use chat::ChatPlugin;
pub use echo::EchoPlugin;
