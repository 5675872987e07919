//! Stratus Protocol - CSI service definitions
//!
//! This crate contains the protobuf-generated code for the subset of the
//! Container Storage Interface (v1) implemented by the Stratus disk driver.

/// CSI v1 services (Identity, Controller, Node)
pub mod csi {
    tonic::include_proto!("csi.v1");
}
