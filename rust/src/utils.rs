// SPDX-License-Identifier: Apache-2.0 OR MIT

/// Returns true if the current process is running with root privileges.
pub fn am_privileged() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Map the Rust target architecture onto the RPM `$basearch` value.
pub fn get_rpm_basearch() -> String {
    rpm_basearch_for(std::env::consts::ARCH).to_string()
}

fn rpm_basearch_for(arch: &str) -> &str {
    match arch {
        "x86" => "i386",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        "arm" => "armhfp",
        o => o,
    }
}
