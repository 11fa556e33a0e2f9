//! salt-api client library.
//!
//! Provides the HTTP API wrapper, session token lifecycle, lowstate
//! dispatch, per-job polling, and the result stream that fans all of them
//! into one bounded output for the `saltctl` command.

pub mod aggregator;
pub mod api;
pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod session;
pub mod watcher;

pub use aggregator::{ClosePolicy, CloseReason, LostJob, ResultSink, ResultStream};
pub use api::SaltApi;
pub use dispatcher::{submit_with_reauth, DispatchOptions, Dispatcher};
pub use error::ClientError;
pub use session::{Credentials, SecretPrompt, Session, SessionGuard, SessionManager, TokenStore};
pub use watcher::{JobWatcher, WatchOutcome};
