pub mod auth;
pub mod cache;
pub mod fetch;
pub mod imap;
pub mod outbound;
pub mod smtp;
pub mod status;
pub mod sync;

#[cfg(test)]
pub mod testing;
