//! End-to-end tests at the dispatcher request/response level.
//!
//! Each test file covers a specific scenario. Requests run against a real
//! session store in a temporary directory, a scripted fake engine and a
//! simulated clock.

#![cfg(unix)]

mod helpers;

mod test_cancellation;
mod test_concurrency;
mod test_expiry;
mod test_fresh_build;
mod test_origin;
