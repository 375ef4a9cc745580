// Stamp `facegrid --version` with the short git hash when building from a checkout.
use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
    else {
        return;
    };
    if !output.status.success() {
        return;
    }
    let hash = String::from_utf8_lossy(&output.stdout);
    let hash = hash.trim();
    if !hash.is_empty() {
        println!("cargo:rustc-env=FACEGRID_GIT_HASH={hash}");
    }
}
