//! Identity & registry (C3) and the routing/client tables layered on top
//! (`spec.md` §4.8): plain CRUD over the manifest store that anchors the
//! message-routing contract `ServerCommandBus` relies on.

pub mod client;
pub mod command_bus;
pub mod error;
pub mod node_manifest;
pub mod routing;
pub mod server_registry;

pub use client::ClientManifest;
pub use command_bus::{CommandSender, ServerCommandBus};
pub use error::{RegistryError, Result};
pub use node_manifest::{NodeManifest, NodePlacement};
pub use routing::RoutingManifest;
pub use server_registry::ServerRegistry;
