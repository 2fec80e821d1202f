fn main() -> Result<(), Box<dyn std::error::Error>> {
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);

    // Compile proto files
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &[
                "proto/envoy/service/auth/v3/external_auth.proto",
                "proto/gatehouse/session/v1/session.proto",
            ],
            &["proto"],
        )?;

    // Re-run if proto files change
    println!("cargo:rerun-if-changed=proto");

    Ok(())
}
