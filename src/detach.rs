//! Background detachment.
//!
//! X selection ownership only lasts as long as the owning process, so the
//! responder has to outlive the invoking shell command. Instead of forking,
//! the binary re-executes itself in foreground mode and hands the payload
//! over through the child's stdin.

use std::{
	env,
	io::Write,
	process::{Command, Stdio},
};

use log::debug;

use crate::Error;

/// Spawns a detached copy of this binary serving `payload` and returns
/// without waiting for it. The child keeps our stderr so fatal X errors
/// stay visible.
pub fn respawn_in_background(payload: &[u8], duration: Option<u64>) -> Result<(), Error> {
	let exe = env::current_exe().map_err(Error::Detach)?;
	let mut command = Command::new(exe);
	command.arg("--foreground");
	if let Some(secs) = duration {
		command.args(["--duration", &secs.to_string()]);
	}
	let mut child = command
		.stdin(Stdio::piped())
		.stdout(Stdio::null())
		.spawn()
		.map_err(Error::Detach)?;
	debug!("detached responder pid {}", child.id());

	if let Some(mut stdin) = child.stdin.take() {
		stdin.write_all(payload).map_err(Error::Detach)?;
	}
	// Deliberately no wait(): the child serves the selection until someone
	// else claims it, which may be much later.
	Ok(())
}
