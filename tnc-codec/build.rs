fn main() {
    if std::env::var_os("CARGO_FEATURE_FREEDV_SYS").is_some() {
        println!("cargo:rustc-link-lib=codec2");
    }
}
