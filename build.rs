use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
}

fn main() {
    println!("cargo::rerun-if-changed=.git/HEAD");
    println!("cargo::rerun-if-changed=.git/refs/heads");

    // Short revision for `--version`; builds outside a checkout report "unknown".
    let revision = git(&["rev-parse", "--short=8", "HEAD"])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let dirty = git(&["status", "--porcelain"]).is_some_and(|s| !s.trim().is_empty());
    let suffix = if dirty { "-dirty" } else { "" };

    println!("cargo::rustc-env=GIT_HASH={revision}{suffix}");
}
