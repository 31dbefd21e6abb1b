//! Device instances and the adapters they carry.
//!
//! - `models`: static table of installable adapter models
//! - `registry`: per-instance router records (adapters, bound tunnels)

mod models;
mod registry;

pub use models::{adapter_model, adapter_models, AdapterModel};
pub use registry::{
    DeviceError, DeviceRegistry, EnsuredAdapter, Router, RouterSpec, RouterState,
};
