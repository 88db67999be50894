use std::io;

use thiserror::Error;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};

#[derive(Debug, Error)]
pub enum Error {
	#[error("failed to connect to the X11 server: {0}")]
	Connect(#[from] ConnectError),

	#[error("the X11 connection broke down: {0}")]
	Connection(#[from] ConnectionError),

	#[error("an X11 request failed: {0}")]
	Reply(#[from] ReplyError),

	#[error("could not allocate an X11 resource id: {0}")]
	Id(#[from] ReplyOrIdError),

	#[error("the X11 connection has no screen")]
	NoScreen,

	#[error("failed to read standard input: {0}")]
	Stdin(#[source] io::Error),

	#[error("failed to detach the background responder: {0}")]
	Detach(#[source] io::Error),
}
