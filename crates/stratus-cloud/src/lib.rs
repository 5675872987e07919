//! Stratus control-plane client
//!
//! This crate talks to the Stratus Cloud HTTP API on behalf of the disk
//! CSI driver. The [`StorageBackend`] trait is the one capability surface
//! the driver sees; [`ApiClient`] implements it over JSON/REST. All
//! operations are fallible and none are idempotent by themselves —
//! idempotence is layered on top by the driver.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod types;

pub use backend::{StorageBackend, StorageBackendRef};
pub use client::ApiClient;
pub use config::CloudConfig;
pub use error::{CloudError, CloudResult};
pub use types::{GridInfo, NodeInfo, VolumeCreate, VolumeDelete, VolumeInfo};
