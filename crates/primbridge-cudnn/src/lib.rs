//! cuDNN bridge for the primbridge managed runtime.
//!
//! Primitive descriptions are compiled into cuDNN descriptors once and executed inside
//! interop regions of a [`CudnnStream`], which owns the stream's cuDNN and cuBLAS handles.

pub mod api;
pub mod coefficients;
mod config;
mod context;
pub mod descriptor;
mod engine;
pub mod native;
pub mod ops;
mod stream;
pub mod translate;

pub use api::VendorLibraries;
pub use coefficients::{resolve_coefficients, Coefficients};
pub use config::EngineConfig;
pub use engine::CudnnEngine;
pub use ops::{
    BinaryPrimitive, CompiledPrimitive, LrnBackwardPrimitive, LrnForwardPrimitive,
};
pub use stream::{CudnnStream, InteropContext};
