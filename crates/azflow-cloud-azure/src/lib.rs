//! Azure provider for azflow
//!
//! Implements the engine's `ResourceClient` over the Azure Resource Manager
//! REST API:
//!
//! - **Compute**: virtual machines and scale sets (read, with 202 modelled as a
//!   pending fetch)
//! - **Authorization**: role assignment creation
//! - **Async operations**: status polling through `Azure-AsyncOperation` or
//!   `Location` URLs

pub mod client;
pub mod error;

pub use client::{
    ARM_ENDPOINT, AUTHORIZATION_API_VERSION, AzureClient, AzureConfig, COMPUTE_API_VERSION,
};
pub use error::{AzureError, Result};
