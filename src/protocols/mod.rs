//! Protocol implementations
//!
//! Only SMB is spoken today. The native client is feature-gated; the
//! transport contract and the in-memory transport are always available.

pub mod smb;
