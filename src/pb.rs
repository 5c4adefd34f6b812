//! Generated protobuf and gRPC types for the `pcbook` package.
#![allow(clippy::derive_partial_eq_without_eq)]

tonic::include_proto!("pcbook");
