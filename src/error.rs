use thiserror::Error;

/// How the agent reacts to a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// Remote or network trouble. Keep stale state, retry later.
    Transient,
    /// Startup-time configuration failure. Abort before entering the loop.
    Fatal,
    /// Local best-effort work (frame files). Swallow.
    Ignorable,
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote returned status {0}")]
    Status(u16),

    #[error("malformed remote payload: {0}")]
    MalformedPayload(String),

    #[error("duplicate camera id '{0}' in camera list")]
    DuplicateCameraId(String),

    #[error("no cameras available and remote camera list is required: {0}")]
    CamerasRequired(String),

    #[error("frame file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AgentError {
    pub fn class(&self) -> FailureClass {
        match self {
            AgentError::Transport(_) | AgentError::Status(_) | AgentError::MalformedPayload(_) => {
                FailureClass::Transient
            }
            AgentError::DuplicateCameraId(_)
            | AgentError::CamerasRequired(_)
            | AgentError::Config(_) => FailureClass::Fatal,
            AgentError::Io(_) => FailureClass::Ignorable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == FailureClass::Fatal
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;
