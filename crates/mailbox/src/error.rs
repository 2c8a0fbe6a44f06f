use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailboxError {
    #[error("Mailbox {0} has already been received from")]
    AlreadyReceived(String),

    #[error("Mailbox {0} is closed")]
    Closed(String),

    #[error("Singleton exchange expects exactly one sender at {host}:{port}, found {found}")]
    InvalidSingleton {
        host: String,
        port: u16,
        found: usize,
    },
}
