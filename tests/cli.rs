//! CLI surface tests that need no X server: usage errors and help must be
//! decided before any connection attempt.

use std::process::{Command, Stdio};

fn xsc() -> Command {
	Command::new(env!("CARGO_BIN_EXE_xsc"))
}

#[test]
fn non_numeric_duration_is_a_usage_error() {
	let output = xsc()
		.args(["-d", "abc"])
		.stdin(Stdio::null())
		.output()
		.expect("failed to run the xsc binary");

	assert_eq!(output.status.code(), Some(2));
	let stderr = String::from_utf8_lossy(&output.stderr);
	assert!(stderr.contains("invalid value"), "stderr was: {stderr}");
	assert!(stderr.contains("Usage"), "stderr was: {stderr}");
}

#[test]
fn negative_duration_is_a_usage_error() {
	let output = xsc()
		.args(["--duration", "-5"])
		.stdin(Stdio::null())
		.output()
		.expect("failed to run the xsc binary");

	assert_eq!(output.status.code(), Some(2));
}

#[test]
fn oversized_duration_is_a_usage_error() {
	// u64::MAX seconds is not schedulable as a deadline; it must be refused
	// at the flag, before any X interaction.
	let output = xsc()
		.args(["-d", "18446744073709551615"])
		.stdin(Stdio::null())
		.output()
		.expect("failed to run the xsc binary");

	assert_eq!(output.status.code(), Some(2));
	let stderr = String::from_utf8_lossy(&output.stderr);
	assert!(stderr.contains("invalid value"), "stderr was: {stderr}");
}

#[test]
fn help_prints_usage_and_exits_zero() {
	let output = xsc().arg("-h").stdin(Stdio::null()).output().expect("failed to run the xsc binary");

	assert_eq!(output.status.code(), Some(0));
	let stdout = String::from_utf8_lossy(&output.stdout);
	assert!(stdout.contains("Usage"), "stdout was: {stdout}");
	assert!(stdout.contains("--duration"), "stdout was: {stdout}");
}
