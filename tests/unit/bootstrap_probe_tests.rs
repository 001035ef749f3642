//! Unit tests for bootstrap classification: architecture map and version
//! probe.

use outpost::bootstrap::{classify_version_probe, Arch, VersionProbe};
use outpost::proto::version_banner;
use outpost::transport::CommandOutput;

fn output(stdout: &str, stderr: &str, exit_code: i32) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_owned(),
        stderr: stderr.to_owned(),
        exit_code,
    }
}

#[test]
fn uname_values_map_to_supported_architectures() {
    assert_eq!(Arch::from_uname("x86_64"), Some(Arch::Amd64));
    assert_eq!(Arch::from_uname("amd64"), Some(Arch::Amd64));
    assert_eq!(Arch::from_uname("aarch64"), Some(Arch::Arm64));
    assert_eq!(Arch::from_uname("arm64"), Some(Arch::Arm64));
}

#[test]
fn unknown_machines_are_unsupported() {
    for machine in ["mips", "riscv64", "i686", ""] {
        assert_eq!(Arch::from_uname(machine), None, "machine: {machine}");
    }
}

#[test]
fn matching_banner_classifies_as_current() {
    let banner = version_banner();
    let probe = classify_version_probe(&output(&banner, "", 0), &banner);
    assert_eq!(probe, VersionProbe::Current);
}

#[test]
fn banner_comparison_tolerates_trailing_newline_only() {
    let banner = version_banner();
    let with_newline = format!("{banner}\n");
    let probe = classify_version_probe(&output(&with_newline, "", 0), &banner);
    assert_eq!(probe, VersionProbe::Current);
}

#[test]
fn shell_not_found_classifies_as_absent() {
    let banner = version_banner();

    let exit_127 = output("", "sh: .outpost/outpost-agent: not found", 127);
    assert_eq!(classify_version_probe(&exit_127, &banner), VersionProbe::Absent);

    let no_such_file = output("", ".outpost/outpost-agent: No such file or directory", 1);
    assert_eq!(
        classify_version_probe(&no_such_file, &banner),
        VersionProbe::Absent
    );
}

#[test]
fn different_banner_classifies_as_mismatched() {
    let banner = version_banner();
    let probe = classify_version_probe(&output("outpost-agent version 0.0.1", "", 0), &banner);
    assert_eq!(probe, VersionProbe::Mismatched);
}

#[test]
fn matching_banner_with_failing_exit_is_a_mismatch() {
    // A binary that prints the right banner but exits non-zero is broken;
    // reinstalling is the safe classification.
    let banner = version_banner();
    let probe = classify_version_probe(&output(&banner, "", 3), &banner);
    assert_eq!(probe, VersionProbe::Mismatched);
}
