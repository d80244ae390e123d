/// Builds the gRPC client and server code for `proto/helloservice.proto` using
/// `tonic-prost-build`.
///
/// Alongside the generated messages and stubs, an encoded file descriptor set
/// is written so the server can expose the schema through gRPC reflection.
///
/// # Files and Paths
///
/// - Proto file: `proto/helloservice.proto`
/// - Includes: `proto/`
/// - Descriptor set: `OUT_DIR/helloservice_descriptor.bin`
///
/// # Output
///
/// Generated code is pulled in with:
///
/// ```rust
/// tonic::include_proto!("helloservice");
/// pub const FILE_DESCRIPTOR_SET: &[u8] =
///     tonic::include_file_descriptor_set!("helloservice_descriptor");
/// ```
///
/// # Panics
///
/// Panics if `OUT_DIR` is unset or `protoc` cannot compile the schema.
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("helloservice_descriptor.bin");

    println!("cargo:rerun-if-changed=proto/helloservice.proto");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/helloservice.proto"], &["proto"])
        .unwrap();
}
