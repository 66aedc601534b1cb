use std::convert::Infallible;

use crate::body::ResponseBody;

pub type ServerResult<T> = std::result::Result<T, ServerError>;

pub enum ServerError {
    Io(std::io::Error),
    Hyper(hyper::Error),
    Http(hyper::http::Error),
    Json(serde_json::Error),
    GracePeriodElapsed { dropped: usize },
    MissingArgument(&'static str),
    Signal(ctrlc::Error),
    AlreadyStopped,
    ShutdownInterrupted,
}

impl From<Infallible> for ServerError {
    fn from(_: Infallible) -> Self {
        unreachable!("Infallible error")
    }
}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<hyper::Error> for ServerError {
    fn from(e: hyper::Error) -> Self {
        Self::Hyper(e)
    }
}

impl From<hyper::http::Error> for ServerError {
    fn from(e: hyper::http::Error) -> Self {
        Self::Http(e)
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<ctrlc::Error> for ServerError {
    fn from(e: ctrlc::Error) -> Self {
        Self::Signal(e)
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Hyper(e) => write!(f, "Hyper error: {}", e),
            Self::Http(e) => write!(f, "Http error: {}", e),
            Self::Json(e) => write!(f, "JSON error: {}", e),
            Self::GracePeriodElapsed { dropped } => write!(
                f,
                "Grace period elapsed, {dropped} connection(s) force-closed"
            ),
            Self::MissingArgument(s) => write!(f, "Missing argument: {}", s),
            Self::Signal(e) => write!(f, "Unable to install signal handler: {e}"),
            Self::AlreadyStopped => write!(f, "Server already stopped"),
            Self::ShutdownInterrupted => {
                write!(f, "Server went away before completing its shutdown")
            }
        }
    }
}

impl std::fmt::Debug for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

impl std::error::Error for ServerError {}

impl ServerError {
    /// Whether this error only says the server was not running anymore.
    pub fn is_already_stopped(&self) -> bool {
        matches!(self, Self::AlreadyStopped)
    }
}

impl From<ServerError> for hyper::Response<ResponseBody> {
    fn from(val: ServerError) -> Self {
        let mut resp = hyper::Response::new(ResponseBody::plain_text(val.to_string()));
        *resp.status_mut() = hyper::StatusCode::INTERNAL_SERVER_ERROR;
        resp
    }
}
