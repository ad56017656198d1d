//! Greylist policy daemon for Postfix.
//!
//! Speaks the policy-delegation protocol (`key=value` attribute blocks on
//! stdin, `action=...` responses on stdout) and keeps per-triple history in
//! Postgres or SQLite. First contact for a (client_address, sender,
//! recipient) triple is deferred; once the cooldown has elapsed the triple
//! is permitted. Internal errors always fail open.

pub mod engine;
pub mod request;
pub mod response;
pub mod server;
pub mod settings;
pub mod store;
