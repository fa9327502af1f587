fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    prost_build::Config::new().compile_protos(&["proto/proio/core.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/proio/core.proto");
    Ok(())
}
