//! Process exit codes.

use saltctl_client::ClientError;

/// Results were printed (possibly none, after a timeout).
pub const EXIT_OK: u8 = 0;
/// Usage, configuration, transport or decode failure.
pub const EXIT_FAILURE: u8 = 1;
/// salt-api rejected the login credentials.
pub const EXIT_AUTH_REJECTED: u8 = 2;

/// Exit code for an error returned by [`run`](crate::run).
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ClientError>() {
        Some(ClientError::AuthFailure) => EXIT_AUTH_REJECTED,
        _ => EXIT_FAILURE,
    }
}
