//! SQLite-backed run journal for toolgate sessions.
//!
//! Every request a session handles is recorded as a sequence of events: the
//! request itself, the tool subset the index selected, each message, each
//! tool call and result, and the terminal outcome. The journal answers
//! "which tools did it pick, and why did it stop?" after the fact.
//!
//! # Core Concepts
//!
//! - [`EventStore`] wraps a SQLite database; append events, load a session's
//!   history, list sessions.
//! - [`Event`] is one journal entry: id, session id, timestamp, and an
//!   [`EventKind`].
//! - [`SessionId`] is a UUID; it parses back from its display form so the CLI
//!   can resolve prefixes.
//!
//! # Example
//!
//! ```no_run
//! use storage::{Event, EventKind, EventStore, Role, SessionId};
//!
//! let store = EventStore::open("events.db")?;
//! let session = SessionId::new();
//! store.append(&Event::new(session, EventKind::SessionStart))?;
//! store.append(&Event::new(session, EventKind::RunStart { query: "weather in Seattle".into() }))?;
//! store.append(&Event::message(session, Role::User, "weather in Seattle"))?;
//!
//! for event in store.load_session(session)? {
//!     println!("{}: {}", event.timestamp, event.kind.name());
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod event;
mod store;

pub use error::{Error, Result};
pub use event::{Event, EventKind, Role, SessionId};
pub use store::{EventStore, SessionSummary};
