mod parameter;
mod registry;

pub use parameter::{
    parse_bool, Bounds, ParamKind, ParamType, ParamValue, Parameter, ParameterDef,
};
pub use registry::{ModelOption, ModelRegistry, ModelSpec, RegistryError};
