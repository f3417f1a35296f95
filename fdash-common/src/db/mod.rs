//! Local SQLite storage
//!
//! The client keeps no business data locally; the only durable state is the
//! authenticated session, stored in a key-value `settings` table.

pub mod init;
pub mod settings;

pub use init::init_database;
