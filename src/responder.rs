// More info about using the clipboard on X11:
// https://tronche.com/gui/x/icccm/sec-2.html#s-2.6

use std::{
	thread,
	time::{Duration, Instant},
};

use log::{info, trace, warn};
use x11rb::{
	connection::Connection,
	protocol::{
		xproto::{
			Atom, AtomEnum, ConnectionExt as _, CreateWindowAux, EventMask, PropMode, Property,
			SelectionNotifyEvent, SelectionRequestEvent, Time, WindowClass, SELECTION_NOTIFY_EVENT,
		},
		Event,
	},
	rust_connection::RustConnection,
	wrapper::ConnectionExt as _,
	COPY_DEPTH_FROM_PARENT, COPY_FROM_PARENT, NONE,
};

use crate::Error;

type Result<T, E = Error> = std::result::Result<T, E>;

x11rb::atom_manager! {
	pub Atoms: AtomCookies {
		CLIPBOARD,
		TARGETS,
		INCR,

		UTF8_STRING,
		// Text in ISO Latin-1 encoding
		// See: https://tronche.com/gui/x/icccm/sec-2.html#s-2.6.2
		STRING,
		XA_STRING,
		// Text in unknown encoding
		TEXT,

		// Property on our own window, into which the previous selection
		// owner writes the data we snapshot before taking over.
		XSC_PREV_SEL,
	}
}

// The previous owner may take a while to produce a `SelectionNotify`;
// a dead one never will, so the snapshot is bounded.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_millis(4000);
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Holds the snapshot taken before we claimed the selection and the
/// deadline at which it gets written back over the payload.
#[derive(Debug)]
enum RestoreState {
	/// No duration was given; the payload stays until someone else
	/// claims the selection.
	Disabled,
	/// Holding the previous contents, waiting for the deadline.
	Armed { prior: Vec<u8>, deadline: Instant },
	/// Fired or cancelled; the snapshot must never be written again.
	Spent,
}

impl RestoreState {
	/// Arms the restore. A duration too large to represent as a deadline
	/// cannot be scheduled; the snapshot is discarded instead of
	/// overflowing the clock.
	fn arm(prior: Vec<u8>, now: Instant, duration: Duration) -> RestoreState {
		match now.checked_add(duration) {
			Some(deadline) => RestoreState::Armed { prior, deadline },
			None => {
				warn!("restore duration is too large to schedule, restore disabled");
				RestoreState::Spent
			}
		}
	}

	fn deadline(&self) -> Option<Instant> {
		match self {
			RestoreState::Armed { deadline, .. } => Some(*deadline),
			_ => None,
		}
	}

	/// Permanently cancels a pending restore. Called when ownership is
	/// lost, so whatever replaced the selection is not clobbered.
	fn disarm(&mut self) {
		*self = RestoreState::Spent;
	}

	/// Takes the snapshot exactly once, and only when armed and due.
	fn take_due(&mut self, now: Instant) -> Option<Vec<u8>> {
		if let RestoreState::Armed { deadline, .. } = self {
			if now >= *deadline {
				if let RestoreState::Armed { prior, .. } =
					std::mem::replace(self, RestoreState::Spent)
				{
					return Some(prior);
				}
			}
		}
		None
	}
}

/// The INCR property optionally carries a lower bound for the total
/// transfer size: a single 32-bit item.
fn incr_size_hint(value_len: u32, value: &[u8]) -> Option<usize> {
	if value_len != 1 || value.len() != 4 {
		return None;
	}
	let mut buf = [0u8; 4];
	buf.copy_from_slice(value);
	Some(u32::from_ne_bytes(buf) as usize)
}

#[derive(Debug, PartialEq, Eq)]
enum Reply {
	Targets,
	Text,
	Deny,
}

/// Decides how a `SelectionRequest` is answered. Requests without a
/// destination property and requests for targets outside the catalog are
/// denied, never errors.
fn classify_request(atoms: &Atoms, target: Atom, property: Atom) -> Reply {
	if property == NONE {
		Reply::Deny
	} else if target == atoms.TARGETS {
		Reply::Targets
	} else if [atoms.UTF8_STRING, atoms.XA_STRING, atoms.STRING, atoms.TEXT].contains(&target) {
		Reply::Text
	} else {
		Reply::Deny
	}
}

/// Owner of the `CLIPBOARD` selection.
///
/// Serves conversion requests for the payload until another client takes
/// the selection away, at which point [`Responder::serve`] returns.
pub struct Responder {
	conn: RustConnection,
	win_id: u32,
	atoms: Atoms,
	payload: Vec<u8>,
	restore: RestoreState,
}

impl Responder {
	/// Connects to the X server, snapshots the current clipboard when a
	/// restore duration is given, and claims the selection.
	pub fn new(payload: Vec<u8>, restore_after: Option<Duration>) -> Result<Self> {
		let (conn, screen_num) = RustConnection::connect(None)?;
		let screen = conn.setup().roots.get(screen_num).ok_or(Error::NoScreen)?;
		let win_id = conn.generate_id()?;

		let event_mask =
			// To receive the INCR segments of the snapshot.
			EventMask::PROPERTY_CHANGE |
			// To receive DestroyNotify and stop the serve loop.
			EventMask::STRUCTURE_NOTIFY;
		// The window only exists to be the selection owner; it is never mapped.
		conn.create_window(
			COPY_DEPTH_FROM_PARENT,
			win_id,
			screen.root,
			0,
			0,
			1,
			1,
			0,
			WindowClass::COPY_FROM_PARENT,
			COPY_FROM_PARENT,
			&CreateWindowAux::new().event_mask(event_mask),
		)?;
		conn.flush()?;

		let atoms = Atoms::new(&conn)?.reply()?;

		let mut responder =
			Self { conn, win_id, atoms, payload, restore: RestoreState::Disabled };

		if let Some(duration) = restore_after {
			let prior = responder.snapshot_selection()?;
			trace!("snapshotted {} bytes of previous selection", prior.len());
			responder.restore = RestoreState::arm(prior, Instant::now(), duration);
		}

		responder.claim()?;
		Ok(responder)
	}

	/// Keeps asserting ownership until the server confirms our window as
	/// the owner. Claims can race with other clients; the race window is
	/// short, so a plain retry loop is enough.
	fn claim(&self) -> Result<()> {
		loop {
			self.conn.set_selection_owner(self.win_id, self.atoms.CLIPBOARD, Time::CURRENT_TIME)?;
			self.conn.flush()?;
			let owner = self.conn.get_selection_owner(self.atoms.CLIPBOARD)?.reply()?.owner;
			if owner == self.win_id {
				trace!("took ownership of CLIPBOARD");
				return Ok(());
			}
			trace!("lost an ownership race, retrying");
		}
	}

	/// One-shot read of the current clipboard as `UTF8_STRING`, round-tripped
	/// through the scratch property on our own window. Returns an empty
	/// buffer when there is no owner, the owner cannot convert, or the owner
	/// never answers.
	fn snapshot_selection(&self) -> Result<Vec<u8>> {
		// Delete the property first so that the INCR hand-off below can rely
		// on property-notify semantics.
		self.conn.delete_property(self.win_id, self.atoms.XSC_PREV_SEL)?;
		self.conn.convert_selection(
			self.win_id,
			self.atoms.CLIPBOARD,
			self.atoms.UTF8_STRING,
			self.atoms.XSC_PREV_SEL,
			Time::CURRENT_TIME,
		)?;
		self.conn.sync()?;

		let mut incr_data: Vec<u8> = Vec::new();
		let mut using_incr = false;
		let mut timeout_end = Instant::now() + SNAPSHOT_TIMEOUT;

		while Instant::now() < timeout_end {
			let event = match self.conn.poll_for_event()? {
				Some(event) => event,
				None => {
					thread::sleep(POLL_INTERVAL);
					continue;
				}
			};
			match event {
				Event::SelectionNotify(event) => {
					// Property set to NONE means the conversion failed or
					// nobody owns the selection. Nothing to restore then.
					if event.property == NONE {
						return Ok(Vec::new());
					}
					if using_incr {
						warn!("got a SelectionNotify while already receiving INCR segments");
						continue;
					}
					let reply = self
						.conn
						.get_property(
							true,
							self.win_id,
							self.atoms.XSC_PREV_SEL,
							self.atoms.UTF8_STRING,
							0,
							u32::MAX / 4,
						)?
						.reply()?;
					if reply.type_ == self.atoms.UTF8_STRING {
						return Ok(reply.value);
					}
					if reply.type_ == self.atoms.INCR {
						// Deleting the property only works when the type
						// matches, so fetch again with INCR to tell the owner
						// we are ready for the first segment.
						let reply = self
							.conn
							.get_property(
								true,
								self.win_id,
								self.atoms.XSC_PREV_SEL,
								self.atoms.INCR,
								0,
								u32::MAX / 4,
							)?
							.reply()?;
						trace!("previous owner is sending INCR segments");
						using_incr = true;
						if let Some(min_len) = incr_size_hint(reply.value_len, &reply.value) {
							incr_data.reserve(min_len);
						}
						continue;
					}
					warn!("previous owner answered with an unexpected property type");
					return Ok(Vec::new());
				}
				Event::PropertyNotify(event) if using_incr => {
					if event.atom != self.atoms.XSC_PREV_SEL
						|| event.state != Property::NEW_VALUE
					{
						continue;
					}
					let reply = self
						.conn
						.get_property(
							true,
							self.win_id,
							self.atoms.XSC_PREV_SEL,
							self.atoms.UTF8_STRING,
							0,
							u32::MAX / 4,
						)?
						.reply()?;
					if reply.value_len == 0 {
						// A zero-length segment marks the end of the transfer.
						return Ok(incr_data);
					}
					incr_data.extend(reply.value);
					timeout_end = Instant::now() + SNAPSHOT_TIMEOUT;
				}
				_ => trace!("ignoring an unrelated event while snapshotting the selection"),
			}
		}
		warn!("timed out waiting for the previous selection owner");
		Ok(Vec::new())
	}

	/// Serves selection requests until ownership is lost.
	///
	/// Loss of ownership always wins over a due restore: pending events are
	/// drained before the deadline is acted on, so a `SelectionClear` that is
	/// already queued disarms the restore before it can fire.
	pub fn serve(mut self) -> Result<()> {
		loop {
			let event = match self.next_event()? {
				Some(event) => event,
				None => {
					self.apply_restore();
					continue;
				}
			};
			match event {
				Event::SelectionRequest(event) => self.handle_selection_request(&event)?,
				Event::SelectionClear(event) => {
					if event.selection == self.atoms.CLIPBOARD {
						trace!("somebody else owns the clipboard now");
						self.restore.disarm();
						return Ok(());
					}
				}
				Event::DestroyNotify(_) => {
					trace!("responder window is being destroyed");
					return Ok(());
				}
				_ => {}
			}
		}
	}

	/// Blocks for the next event. Returns `None` when the restore deadline
	/// passes with no event arriving before it.
	fn next_event(&mut self) -> Result<Option<Event>> {
		let deadline = match self.restore.deadline() {
			Some(deadline) => deadline,
			None => return self.conn.wait_for_event().map(Some).map_err(Error::from),
		};
		loop {
			if let Some(event) = self.conn.poll_for_event()? {
				return Ok(Some(event));
			}
			if Instant::now() >= deadline {
				return Ok(None);
			}
			thread::sleep(POLL_INTERVAL);
		}
	}

	/// Replaces the payload with the snapshot. Subsequent conversion
	/// requests simply see the restored bytes; there is no re-announcement
	/// and no second restore.
	fn apply_restore(&mut self) {
		if let Some(prior) = self.restore.take_due(Instant::now()) {
			info!("restoring the previous selection ({} bytes)", prior.len());
			self.payload = prior;
		}
	}

	fn handle_selection_request(&self, event: &SelectionRequestEvent) -> Result<()> {
		if event.selection != self.atoms.CLIPBOARD {
			warn!("got a request for a selection other than CLIPBOARD");
			return self.send_notify(event, NONE);
		}
		let property = match classify_request(&self.atoms, event.target, event.property) {
			Reply::Targets => {
				let targets = self.target_catalog();
				self.conn.change_property32(
					PropMode::REPLACE,
					event.requestor,
					event.property,
					AtomEnum::ATOM,
					&targets,
				)?;
				event.property
			}
			Reply::Text => {
				self.conn.change_property8(
					PropMode::REPLACE,
					event.requestor,
					event.property,
					event.target,
					&self.payload,
				)?;
				event.property
			}
			// Unsupported target: notify with no property set.
			Reply::Deny => NONE,
		};
		self.send_notify(event, property)
	}

	fn target_catalog(&self) -> [Atom; 4] {
		[self.atoms.UTF8_STRING, self.atoms.XA_STRING, self.atoms.STRING, self.atoms.TEXT]
	}

	/// Tells the requestor that we finished (or refused) serving its request.
	fn send_notify(&self, event: &SelectionRequestEvent, property: Atom) -> Result<()> {
		self.conn.send_event(
			false,
			event.requestor,
			EventMask::NO_EVENT,
			SelectionNotifyEvent {
				response_type: SELECTION_NOTIFY_EVENT,
				sequence: event.sequence,
				time: event.time,
				requestor: event.requestor,
				selection: event.selection,
				target: event.target,
				property,
			},
		)?;
		self.conn.flush()?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fake_atoms() -> Atoms {
		Atoms {
			CLIPBOARD: 1,
			TARGETS: 2,
			INCR: 3,
			UTF8_STRING: 4,
			STRING: 5,
			XA_STRING: 6,
			TEXT: 7,
			XSC_PREV_SEL: 8,
		}
	}

	#[test]
	fn targets_request_is_recognized() {
		let atoms = fake_atoms();
		assert_eq!(classify_request(&atoms, atoms.TARGETS, 100), Reply::Targets);
	}

	#[test]
	fn every_catalog_target_serves_text() {
		let atoms = fake_atoms();
		for target in [atoms.UTF8_STRING, atoms.XA_STRING, atoms.STRING, atoms.TEXT] {
			assert_eq!(classify_request(&atoms, target, 100), Reply::Text);
		}
	}

	#[test]
	fn unknown_target_is_denied() {
		let atoms = fake_atoms();
		assert_eq!(classify_request(&atoms, 999, 100), Reply::Deny);
	}

	#[test]
	fn missing_destination_property_is_denied() {
		let atoms = fake_atoms();
		// Even a supported target gets denied without a property to write to.
		assert_eq!(classify_request(&atoms, atoms.UTF8_STRING, NONE), Reply::Deny);
	}

	#[test]
	fn restore_fires_once_when_due() {
		let mut state =
			RestoreState::Armed { prior: b"old".to_vec(), deadline: Instant::now() };
		assert_eq!(state.take_due(Instant::now()), Some(b"old".to_vec()));
		assert_eq!(state.take_due(Instant::now()), None);
	}

	#[test]
	fn restore_does_not_fire_before_deadline() {
		let deadline = Instant::now() + Duration::from_secs(60);
		let mut state = RestoreState::Armed { prior: b"old".to_vec(), deadline };
		assert_eq!(state.take_due(Instant::now()), None);
		assert!(matches!(state, RestoreState::Armed { .. }));
	}

	#[test]
	fn disarm_discards_the_snapshot_for_good() {
		let mut state =
			RestoreState::Armed { prior: b"old".to_vec(), deadline: Instant::now() };
		state.disarm();
		// Even a long-overdue deadline must not resurrect the snapshot.
		assert_eq!(state.take_due(Instant::now() + Duration::from_secs(5)), None);
	}

	#[test]
	fn disabled_state_never_fires() {
		let mut state = RestoreState::Disabled;
		assert_eq!(state.take_due(Instant::now()), None);
	}

	#[test]
	fn arming_with_a_plain_duration_schedules_the_deadline() {
		let now = Instant::now();
		let mut state = RestoreState::arm(b"old".to_vec(), now, Duration::from_secs(2));
		assert_eq!(state.take_due(now + Duration::from_secs(3)), Some(b"old".to_vec()));
	}

	#[test]
	fn arming_with_an_unrepresentable_duration_does_not_overflow() {
		// u64::MAX seconds cannot be added to an Instant; the restore has
		// to be dropped, not panic.
		let mut state =
			RestoreState::arm(b"old".to_vec(), Instant::now(), Duration::from_secs(u64::MAX));
		assert!(matches!(state, RestoreState::Spent));
		assert_eq!(state.take_due(Instant::now()), None);
	}

	#[test]
	fn incr_size_hint_is_one_32_bit_item() {
		assert_eq!(incr_size_hint(1, &4096u32.to_ne_bytes()), Some(4096));
	}

	#[test]
	fn incr_size_hint_ignores_other_shapes() {
		// No hint at all, and a malformed multi-item property.
		assert_eq!(incr_size_hint(0, &[]), None);
		assert_eq!(incr_size_hint(4, &[0; 16]), None);
	}
}
