// AT-command engine shared by the upload and vehicle paths.
pub mod command;
pub mod ftp;
pub mod gps;
pub mod matcher;
pub mod parse;
pub mod retry;
pub mod session;
pub mod sms;
pub mod transport;

#[cfg(test)]
pub mod testing;
