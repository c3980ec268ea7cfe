//! 能力层：注册表、调用适配器、内置能力（echo、clock）

pub mod clock;
pub mod echo;
pub mod invoker;
pub mod registry;
pub mod schema;

pub use clock::ClockCapability;
pub use echo::EchoCapability;
pub use invoker::{
    parse_arguments, ArgumentFormatError, CapabilityLog, Invocation, InvocationError, SkillInvoker,
};
pub use registry::{Capability, CapabilityError, CapabilityMetadata, CapabilityRegistry, FnCapability};
pub use schema::parameters_schema;
