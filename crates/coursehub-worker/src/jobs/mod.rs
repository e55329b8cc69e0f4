//! Built-in job handler implementations.

pub mod echo;

pub use echo::EchoJobHandler;

use crate::registry::HandlerRegistry;

/// Handler type of [`EchoJobHandler`].
pub const ECHO: &str = "echo";

/// Register every built-in handler.
pub fn register_builtin(registry: &mut HandlerRegistry) {
    registry.register(ECHO, || EchoJobHandler);
}
