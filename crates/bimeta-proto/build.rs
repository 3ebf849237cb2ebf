fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the vendored protoc so builds don't depend on a system install.
    let mut config = prost_build::Config::new();
    config.protoc_executable(protoc_bin_vendored::protoc_bin_path()?);

    // Messages double as REST bodies.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .type_attribute(".bimeta.v1", "#[derive(serde::Serialize, serde::Deserialize)]")
        .compile_protos_with_config(config, &["proto/meta.proto"], &["proto"])?;

    Ok(())
}
