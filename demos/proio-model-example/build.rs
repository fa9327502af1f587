use std::{env, path::PathBuf};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if env::var_os("PROTOC").is_none() {
        env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("proio_model_example.bin");

    prost_reflect_build::Builder::new()
        .descriptor_pool("crate::DESCRIPTOR_POOL")
        .file_descriptor_set_path(&descriptor_path)
        .compile_protos(
            &["proto/example/particle.proto", "proto/example/simhit.proto"],
            &["proto"],
        )?;

    println!("cargo:rerun-if-changed=proto/example/particle.proto");
    println!("cargo:rerun-if-changed=proto/example/simhit.proto");
    Ok(())
}
