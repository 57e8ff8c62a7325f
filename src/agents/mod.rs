mod registry;
mod routing;
mod unit;

pub use registry::{AgentRegistry, RegistryError};
pub use routing::{AgentRouter, RoutingError, confidence};
pub use unit::{
    AgentError, AgentKind, AgentUnit, Backends, FailureKind, Keyword, ModelTier, UnitInput,
    UnitOutput,
};
