fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Pass through RUNWATCH_GIT_HASH from packaged builds without a .git directory
    println!("cargo:rerun-if-env-changed=RUNWATCH_GIT_HASH");
    if let Ok(hash) = std::env::var("RUNWATCH_GIT_HASH") {
        println!("cargo:rustc-env=RUNWATCH_GIT_HASH={}", hash);
    }
}
