use std::path::Path;
use std::process::Command;

/// The package version, followed by the git revision when building from a checkout.
fn get_version() -> String {
    let version = env!("CARGO_PKG_VERSION").to_string();
    let output = Command::new("git")
        .args(["describe", "--tags", "--dirty=+dirty", "--long"])
        .output();
    match output {
        Ok(output) if output.status.success() => {
            let from_git = String::from_utf8_lossy(&output.stdout);
            match from_git.trim() {
                "" => version,
                rev => format!("{version}\n\nRevision: {rev}"),
            }
        }
        _ => version,
    }
}

fn main() {
    let out_dir = std::env::var("OUT_DIR").expect("missing OUT_DIR");
    let version_file_path = Path::new(&out_dir).join("version.txt");
    if let Err(e) = std::fs::write(&version_file_path, get_version()) {
        panic!(
            "Failed to write the version file at {}: {}",
            version_file_path.display(),
            e
        );
    }
    println!("cargo:rerun-if-changed=.git/refs");
    println!("cargo:rerun-if-changed=.git/index");
}
