//! Flag plumbing clap can't express: tar-style bundled short flags and
//! value validation for the platform string.

use anyhow::{bail, Result};

const OS_VALUES: &[&str] = &["darwin", "linux", "windows"];
const ARCH_VALUES: &[&str] = &["amd64", "arm64"];

/// Checks an optional `os/arch` platform string.
///
/// # Errors
///
/// Returns an error when the shape or either field is invalid.
pub fn validate_platform(platform: &str) -> Result<()> {
    if platform.is_empty() {
        return Ok(()); // optional
    }
    let fields: Vec<&str> = platform.split('/').collect();
    let &[os, arch] = fields.as_slice() else {
        bail!("invalid [platform] flag: {platform:?} should be 2 / delimited fields");
    };
    if !OS_VALUES.contains(&os) {
        bail!("invalid [platform] flag: {platform:?} has an invalid OS");
    }
    if !ARCH_VALUES.contains(&arch) {
        bail!("invalid [platform] flag: {platform:?} has an invalid architecture");
    }
    Ok(())
}

/// Un-bundles tar-like grouped short flags, e.g. `-tvvf` becomes
/// `--very-verbose -t -f`, so `car -tvf image:tag` works the way tar users
/// expect. Long flags and non-flag arguments pass through untouched.
pub fn unbundle<I: IntoIterator<Item = String>>(args: I) -> Vec<String> {
    let mut result = Vec::new();
    for arg in args {
        if !arg.starts_with('-') || arg.starts_with("--") {
            result.push(arg);
            continue;
        }
        let arg = extract_flag(arg, "vv", "--very-verbose", &mut result);
        let arg = extract_flag(arg, "v", "-v", &mut result);
        let arg = extract_flag(arg, "q", "-q", &mut result);
        match arg.as_str() {
            "" => {}
            "-tf" => result.extend(["-t".to_string(), "-f".to_string()]),
            "-xf" => result.extend(["-x".to_string(), "-f".to_string()]),
            _ => result.push(arg),
        }
    }
    result
}

/// Peels one bundled flag out of `arg`, emitting its canonical spelling.
/// `vv` must be peeled before `v` so `-tvvf` doesn't half-match.
fn extract_flag(arg: String, flag: &str, emit: &str, out: &mut Vec<String>) -> String {
    if arg.is_empty() {
        return arg;
    }
    if arg == format!("-{flag}") {
        out.push(emit.to_string());
        return String::new();
    }
    if arg.contains(flag) {
        out.push(emit.to_string());
        return arg.replacen(flag, "", 1);
    }
    arg
}
