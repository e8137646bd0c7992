pub mod config;
pub mod db;
pub mod dropbox;
pub mod reminders;
pub mod stats;
pub mod sync;
