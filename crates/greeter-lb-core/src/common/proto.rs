//! Wire types for the `helloservice.Greeter` gRPC service.
//!
//! Messages and client/server stubs are generated by `build.rs` from
//! `proto/helloservice.proto` and included below.
//!
//! ## Service
//!
//! - `SayHello` - unary call answering a [`HelloRequest`] with a
//!   [`HelloResponse`] whose message names the backend that served it.

tonic::include_proto!("helloservice");

/// Encoded descriptor set for `proto/helloservice.proto`, served through gRPC
/// reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] =
    tonic::include_file_descriptor_set!("helloservice_descriptor");
