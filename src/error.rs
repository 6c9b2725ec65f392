//! Error taxonomy for the command pipeline.
//!
//! - [`Rejection`]: the user asked for something we will not do. Always
//!   answered with a localized message, never with internal detail.
//! - [`PlatformError`]: a platform API call failed. Logged, not retried.
//! - [`DispatchError`]: everything that can leave the dispatcher, including
//!   failures inside an already-authorized command body.

use thiserror::Error;

use crate::args::FailureReason;
use crate::locale::Localizer;
use crate::permissions::PermissionAxis;

/// Failures talking to a platform API.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{platform} api error ({status}): {message}")]
    Api {
        platform: &'static str,
        status: u16,
        message: String,
    },

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// A command invocation refused because of user input or missing rights.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no value for argument {0}")]
    MissingArgument(String),

    #[error("invalid value for argument {name}: {reason:?}")]
    InvalidArgument { name: String, reason: FailureReason },

    #[error("missing {axis:?} permission {permission}")]
    PermissionDenied {
        axis: PermissionAxis,
        permission: String,
    },

    #[error("command {0} is only available in servers")]
    GuildOnly(String),
}

impl Rejection {
    /// Static label for logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingArgument(_) => "missing_argument",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::GuildOnly(_) => "guild_only",
        }
    }

    /// The text shown to the user.
    pub fn message(&self, loc: &Localizer) -> String {
        match self {
            Self::MissingArgument(name) => loc.get_string("arg.missing", &[name]),
            Self::InvalidArgument { name, reason } => {
                let detail = loc.get_string(reason.string_id(), reason.args().as_slice());
                loc.get_string("arg.invalid", &[name, &detail])
            }
            Self::PermissionDenied { axis, permission } => match axis {
                PermissionAxis::Native => loc.get_string("permission.native", &[permission]),
                PermissionAxis::Bot => loc.get_string("permission.bot", &[permission]),
            },
            Self::GuildOnly(command) => loc.get_string("private.guild_only", &[command]),
        }
    }
}

/// Anything that stops a message short of a reply.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("command {command} failed: {error:#}")]
    Internal {
        command: &'static str,
        error: anyhow::Error,
    },
}

impl DispatchError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Platform(_) => "platform_error",
            Self::Storage(_) => "storage_error",
            Self::Internal { .. } => "internal_error",
        }
    }
}
