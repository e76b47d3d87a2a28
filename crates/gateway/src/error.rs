use libertycall_esl::EslError;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unknown call '{0}'")]
    UnknownCall(String),
    #[error("client profile error: {0}")]
    ClientProfile(String),
    #[error("softswitch command failed: {0}")]
    Esl(#[from] EslError),
    #[error("media error: {0}")]
    Media(#[from] libertycall_media::MediaError),
    #[error("session logging error: {0}")]
    SessionLog(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad init frame: {0}")]
    BadInitFrame(String),
}
