use std::{
	io::{self, Read},
	process,
	time::Duration,
};

use clap::Parser;
use log::debug;
use xsc::{detach, Error, Responder};

/// Copy standard input into the X11 CLIPBOARD selection.
#[derive(Parser, Debug)]
#[command(
	version,
	about = "Copy standard input into the X11 CLIPBOARD selection",
	long_about = "Copy standard input into the X11 CLIPBOARD selection.\n\n\
		With -d, the previous selection is restored after the given number of \
		seconds, unless something else claimed the selection in the meantime."
)]
struct Args {
	/// Restore the previous selection contents after this many seconds,
	/// unless the selection was overwritten in the meantime
	#[arg(
		short = 'd',
		long = "duration",
		value_name = "SECONDS",
		value_parser = clap::value_parser!(u64).range(..=u32::MAX as u64)
	)]
	duration: Option<u64>,

	/// Serve selection requests from this process instead of detaching a
	/// background responder
	#[arg(long)]
	foreground: bool,
}

fn main() {
	env_logger::init();
	let args = Args::parse();
	if let Err(err) = run(&args) {
		eprintln!("xsc: {err}");
		process::exit(1);
	}
}

fn run(args: &Args) -> Result<(), Error> {
	let mut payload = Vec::new();
	io::stdin().lock().read_to_end(&mut payload).map_err(Error::Stdin)?;
	debug!("read {} bytes from stdin", payload.len());

	if !args.foreground {
		// The caller's shell gets its prompt back; the background copy of
		// ourselves serves the selection until it is overwritten.
		return detach::respawn_in_background(&payload, args.duration);
	}

	let responder = Responder::new(payload, args.duration.map(Duration::from_secs))?;
	responder.serve()
}
