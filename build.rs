use std::process::Command;

/// Run git and return trimmed stdout on success
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn main() {
    // `git diff --quiet` fails on a dirty tree
    let git_hash = match git(&["rev-parse", "--short", "HEAD"]) {
        Some(hash) if git(&["diff", "--quiet"]).is_none() => format!("{}-dirty", hash),
        Some(hash) => hash,
        None => "unknown".to_string(),
    };

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}
