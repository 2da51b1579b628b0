//! Wire types for the Eureka REST protocol.

pub mod instance;
pub mod registry;

pub use instance::{
    ActionType, DataCenterInfo, DataCenterName, InstanceRecord, InstanceStatus, NumberOrString,
    OneOrMany, PortValue,
};
pub use registry::{Application, Applications, RegistryResponse};
