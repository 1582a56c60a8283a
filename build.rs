fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/dapr/runtime.proto");

    // The server half backs the in-process fake sidecar used by unit tests
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/dapr/runtime.proto"], &["proto"])?;
    Ok(())
}
