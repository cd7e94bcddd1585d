//! gRPC protocol definitions for the bucket provisioner plugin
//!
//! The controller is the client; plugins implement the server. Four unary
//! calls make up the protocol:
//!
//! - `Provision` / `Deprovision` create and delete a bucket
//! - `Grant` / `Revoke` bind to and release an existing bucket
//!
//! # Example
//!
//! ```ignore
//! use cosi::proto::provisioner_client::ProvisionerClient;
//!
//! let mut client = ProvisionerClient::new(channel);
//! let bucket = client
//!     .provision(ProvisionRequest {
//!         request_bucket_name: "logs".into(),
//!         parameters: Default::default(),
//!     })
//!     .await?
//!     .into_inner();
//! ```

#![allow(missing_docs)] // Generated code doesn't have docs

/// Generated protobuf and gRPC code for the provisioner protocol
pub mod provisioner {
    /// Version 1 of the provisioner protocol
    pub mod v1 {
        tonic::include_proto!("cosi.provisioner.v1");
    }
}

pub use provisioner::v1::*;
