//! Build provenance for `linkprims version --extended`.

fn main() {
    for (source, exported) in [
        ("TARGET", "LINKPRIMS_BUILD_TARGET"),
        ("PROFILE", "LINKPRIMS_BUILD_PROFILE"),
        ("GIT_HASH", "LINKPRIMS_GIT_HASH"),
    ] {
        if let Ok(value) = std::env::var(source) {
            println!("cargo:rustc-env={exported}={value}");
        }
        println!("cargo:rerun-if-env-changed={source}");
    }
}
