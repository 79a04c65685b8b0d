//! Runtime core: the supervisor and its registry.
//!
//! - [`supervisor`]: root object owning the event hub, registry, connections and stdout sink;
//! - [`builder`]: assembles a supervisor from a [`Config`](crate::Config);
//! - [`registry`]: live tasks, weakly referenced.

mod builder;
mod registry;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use registry::Registry;
pub use supervisor::Supervisor;
