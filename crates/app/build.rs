use std::process::Command;

/// Embeds the build's git revision as `BILLET_GIT_HASH`. Source tarballs have
/// no `.git`, so a packager can pin the value through the same variable.
fn main() {
    println!("cargo:rerun-if-env-changed=BILLET_GIT_HASH");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/index");

    let revision = std::env::var("BILLET_GIT_HASH")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(describe)
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=BILLET_GIT_HASH={revision}");
}

/// Short hash with a `-dirty` suffix for uncommitted changes.
fn describe() -> Option<String> {
    let out = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=7", "--exclude", "*"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let revision = String::from_utf8(out.stdout).ok()?;
    Some(revision.trim().to_string())
}
