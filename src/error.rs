/// Failure of a call into the Meross cloud SDK.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VendorError {
    /// The request never got a usable answer (network, timeout, broker).
    #[error("transport error: {0}")]
    Transport(String),

    /// The cloud or the device answered with something we could not use.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The device answered but refused the command.
    #[error("command rejected: {0}")]
    Rejected(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

impl VendorError {
    pub fn is_transport(&self) -> bool {
        matches!(self, VendorError::Transport(_))
    }
}

/// Why a poll cycle did not produce fresh state. Both cases surface to the
/// host as `connected = false`; the split only exists for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("device reported offline")]
    Offline,

    #[error(transparent)]
    Vendor(#[from] VendorError),
}

impl PollError {
    /// Short class name used in log lines.
    pub fn class(&self) -> &'static str {
        match self {
            PollError::Offline => "offline",
            PollError::Vendor(VendorError::Transport(_)) => "transport",
            PollError::Vendor(_) => "protocol",
        }
    }
}

/// Rejected property write. The cached value is untouched in every case.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("unknown property: {0}")]
    UnknownProperty(String),

    #[error("property {0} is read-only")]
    ReadOnly(&'static str),

    #[error("invalid value for {property}: {value}")]
    InvalidValue {
        property: &'static str,
        value: serde_json::Value,
    },

    #[error(transparent)]
    Vendor(#[from] VendorError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{0}")]
    Invalid(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
