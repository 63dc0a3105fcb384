//! # Gardisto (Account Lifecycle & Authentication Backbone)
//!
//! `gardisto` is the account lifecycle and authentication core of the
//! platform. It owns OTP-based verification, token issuance, the account
//! state machine, role-based authorization, and deferred account deletion.
//!
//! ## Account Lifecycle
//!
//! Accounts move along `pending_verification -> active -> disabled ->
//! pending_deletion -> deleted`. Disable/enable and cancel-deletion are the
//! only reversible edges; `deleted` is terminal and deleted accounts behave
//! as if they never existed.
//!
//! - **Registration:** self-service signup lands in `pending_verification`
//!   and is activated by a one-time code delivered out of band.
//! - **Deferred deletion:** a deletion request opens a grace period during
//!   which the owner (or an authorized admin) can cancel; once the grace
//!   deadline passes a background purge finalizes the deletion.
//!
//! ## Tokens
//!
//! Access tokens are short-lived HS256 JWTs verified without a store lookup.
//! Refresh tokens are opaque, stored hashed, and rotated on every use;
//! presenting an already-rotated token revokes its entire rotation chain.
//!
//! ## Authorization
//!
//! `SUPER_ADMIN > STAFF_ADMIN > USER`. Staff admins manage user accounts
//! only; every denial is a uniform `Forbidden` so error shapes cannot be
//! used to enumerate accounts.
//!
//! Persistence is Postgres behind store traits; the in-memory versions in
//! [`test_support`] back the test suite.

pub mod account;
pub mod authz;
pub mod cli;
pub mod config;
pub mod deletion;
pub mod delivery;
pub mod error;
pub mod otp;
pub mod test_support;
pub mod token;
