// Logs module - In-memory capture of service output

mod cache;

pub use cache::{LogCache, LogEntry, SearchMatch, SharedLogCache};
