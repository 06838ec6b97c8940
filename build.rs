fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/fleet/v1/fleet.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/fleet/v1/fleet.proto");

    Ok(())
}
