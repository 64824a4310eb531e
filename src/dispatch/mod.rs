//! Command dispatch.
//!
//! A [`Command`] names a [`Method`] and its parameters. The [`Dispatcher`]
//! checks it against the device's capabilities and room graph, sends it
//! over the device's session and waits for the response with the same
//! request id, resending on silence up to the configured retry count.
//!
//! Mutating methods are only acknowledged by their response. Use
//! [`Dispatcher::issue_confirmed`] or [`Dispatcher::confirm`] to wait for
//! the device's status to reflect the change.
//!
//! ```no_run
//! use std::sync::Arc;
//! use robovac::dispatch::{Command, Dispatcher};
//! use robovac::model::DeviceId;
//! use robovac::session::SessionManager;
//!
//! # async fn example(manager: Arc<SessionManager>) -> robovac::Result<()> {
//! let dispatcher = Dispatcher::new(manager);
//! let device = DeviceId::from("1a2b3c");
//! let session = dispatcher.manager().device(&device)?;
//! let kitchen = session.room_graph().select_by_names(&["Kitchen"])?;
//! dispatcher.issue(&device, Command::segment_clean(kitchen, 1)?).await?;
//! # Ok(())
//! # }
//! ```

mod command;
mod dispatcher;
mod method;

pub use command::{Command, DndWindow, Schedule, Zone, MAX_PASSES, MAX_ZONES};
pub use dispatcher::{Dispatcher, Outcome};
pub use method::Method;
