fn main() {
    println!("cargo:rerun-if-changed=models/vgg19.onnx");

    // Converts the ONNX VGG19 into a named-mpk record under models/. Only the
    // record is consumed at runtime, by `model::vgg19::Vgg19::from_file`.
    #[cfg(feature = "build_vgg")]
    {
        use burn_import::onnx::{ModelGen, RecordType};

        println!("cargo:warning=converting models/vgg19.onnx");
        ModelGen::new()
            .input("models/vgg19.onnx")
            .out_dir("models/")
            .record_type(RecordType::NamedMpk)
            .run_from_cli();
    }
}
