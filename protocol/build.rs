fn main() {
    if std::env::var_os("PROTOC").is_none() {
        unsafe {
            std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());
        }
    }

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/carbonapi_v3.proto"], &["proto"])
        .expect("Failed to compile protobuf");

    println!("cargo:rerun-if-changed=proto/carbonapi_v3.proto");
}
