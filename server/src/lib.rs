// Life of a request:
// 1. A multipart form comes in on `POST /btree`
// 2. Collect the form fields into an untrusted `BuildRequest`
// 3. Classify by session token:
//     - No token, from the start page: allocate a session, stage the input,
//       run the engine in build mode, issue a token
//     - Valid token: lock the session, check it is live and built, run the
//       engine with the values to insert, touch the session
//     - Anything else: reject
// 4. Append an audit record
// 5. Respond with the rendered tree or an error page
//
// System components:
//  - Session store with per-session locks and a background sweep
//  - External tree engine, run once per action
//  - Signed session tokens
//  - Audit log

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod audit;
pub mod auth;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod pages;
pub mod params;
pub mod samples;
pub mod session;
pub mod time;
pub mod web;

#[cfg(test)]
mod e2e_tests;
#[cfg(test)]
mod testing;

pub use dispatcher::{BuildRequest, Dispatcher, Visualization};
pub use error::DispatchError;
