//! # farmgate
//!
//! `farmgate` is the credential and session lifecycle service of the Farmo
//! marketplace backend. Every other backend subsystem (products, orders,
//! wallets, ratings) treats it as the single authority for:
//!
//! - **Session tokens:** opaque bearer pairs (token + refresh token) with a
//!   per-principal device cap of two; the oldest active session is evicted
//!   when a third device signs in. Rows are retired by status change and
//!   kept for audit, never deleted.
//! - **Rotation:** expired pairs presented on the remember-me path are
//!   replaced through the same eviction/issuance steps as a login.
//! - **Revocation:** single-session logout and "sign out everywhere".
//! - **One-time passcodes:** short-lived single-use numeric codes backing
//!   the forgotten-password flow, delivered out of band.
//!
//! ## Storage
//!
//! `PostgreSQL` is the single source of truth; there is no in-process session
//! cache. Only SHA-256 hashes of token material and passcodes are persisted.
//! Session ids use **`UUIDv7`** so the primary index stays insert-ordered.
//! The capacity-bounded insert runs as one transaction with the principal's
//! ACTIVE rows locked, so two concurrent logins cannot overshoot the cap.

pub mod auth;
pub mod cli;
pub mod farmgate;
