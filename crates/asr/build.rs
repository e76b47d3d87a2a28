fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(false)
        .compile_protos(&["proto/google_speech.proto"], &["proto/"])?;
    Ok(())
}
