fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::compile_protos("proto/quorum.proto")?;
    println!("cargo:rerun-if-changed=proto/quorum.proto");
    Ok(())
}
