//! Parameter remapping / injection engine (Component G): rewrites Bind
//! argument blocks and Parse parameter-type lists to inject hidden
//! "extracted constant" and "global" parameters the wire never carries.

pub mod remap;

pub use self::remap::{remap_arguments, remap_parameters, ParamSchema, ExtractedConstant, GlobalParam, oid};
