use std::path::PathBuf;

// Regenerates include/tagdispatch.h. Generation failures are warnings.
fn main() {
    println!("cargo:rerun-if-changed=src");

    let Ok(crate_dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let out = PathBuf::from(&crate_dir).join("include").join("tagdispatch.h");

    let generated = cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_language(cbindgen::Language::C)
        .with_include_guard("TAGDISPATCH_H")
        .with_documentation(true)
        .generate();

    match generated {
        Ok(bindings) => {
            if let Some(dir) = out.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            bindings.write_to_file(&out);
        }
        Err(e) => println!("cargo:warning=cbindgen: {e}"),
    }
}
