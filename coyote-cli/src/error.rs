//! The looser error type used at the process boundary. `coyote-core`
//! propagates a closed `CoyoteError` taxonomy internally; here we only
//! need enough structure to pick an exit code (spec §6: 0/1/2/3) and
//! print something a terminal user can act on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CliError {
    /// The process exit code a failure of this kind should produce.
    /// Bug-found isn't an error at all from this type's point of view —
    /// `main` handles that branch before an error ever gets here.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => 2,
            CliError::Internal(_) => 3,
        }
    }
}

impl From<coyote_core::CoyoteError> for CliError {
    fn from(err: coyote_core::CoyoteError) -> Self {
        CliError::Usage(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Internal(err.into())
    }
}
