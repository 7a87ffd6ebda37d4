//! Domain types shared across crates

pub mod account;
pub mod mail;
pub mod user;

pub use account::{AccountStatus, Group, MailAccount, VerificationResult};
pub use mail::{MailDetail, MailFolder, MailMessage};
pub use user::User;
