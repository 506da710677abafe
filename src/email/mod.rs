//! Email channel

pub mod smtp;

pub use smtp::SmtpEmailSender;
