//! Credential records and the redacted secrets they carry.

pub mod record;
pub mod secret;
