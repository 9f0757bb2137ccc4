//! Build script to inject the git SHA at compile time.
//!
//! MRB_GIT_SHA overrides the value; otherwise `git rev-parse` is asked,
//! falling back to "unknown".

use std::process::Command;

fn main() {
    let git_sha = std::env::var("MRB_GIT_SHA").unwrap_or_else(|_| get_git_sha());
    println!("cargo:rustc-env=MRB_GIT_SHA={}", git_sha);

    println!("cargo:rerun-if-env-changed=MRB_GIT_SHA");
}

fn get_git_sha() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".into())
}
