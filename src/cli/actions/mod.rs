pub mod worker;

use secrecy::SecretString;

#[derive(Debug)]
pub enum Action {
    Worker {
        dsn: String,
        access_token_secret: SecretString,
        issuer: String,
        purge_poll_seconds: u64,
        outbox_poll_seconds: u64,
        otp_cleanup_seconds: u64,
    },
}
