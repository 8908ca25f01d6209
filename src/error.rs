use failure::{Backtrace, Context, Fail};
use std::any::Any;
use std::fmt::Display;
use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

#[derive(Debug, Fail)]
pub enum ErrorKind {
    #[fail(display = "{}", _0)]
    IO(#[cause] io::Error),

    #[fail(display = "{}", _0)]
    Json(#[cause] serde_json::Error),

    #[fail(display = "invalid config: {}", _0)]
    Config(String),

    #[fail(display = "thread {} is already running", _0)]
    AlreadyRunning(String),

    #[fail(display = "thread {} is not scheduled to run", _0)]
    NotScheduled(String),

    #[fail(display = "thread {} executed from the wrong system thread", _0)]
    WrongThread(String),

    #[fail(display = "cancelled")]
    Cancelled,

    #[fail(display = "panicked: {}", _0)]
    Panicked(String),

    #[fail(display = "{}", _0)]
    Task(String),

    #[fail(display = "task {} is already submitted", _0)]
    DuplicateTask(u64),

    #[fail(display = "{} is shut down", _0)]
    ShutDown(String),

    #[fail(display = "cannot wait for job {} in its execution thread", _0)]
    WaitOnOwnThread(u64),
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.inner.get_context()
    }

    /// Cancellation is an outcome, not a failure; workers route it to `on_cancel`.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancelled)
    }

    pub fn cancelled() -> Self {
        Error::from(ErrorKind::Cancelled)
    }

    /// Failure reported by caller-supplied work.
    pub fn task<S: Into<String>>(message: S) -> Self {
        Error::from(ErrorKind::Task(message.into()))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_owned()
        };
        Error::from(ErrorKind::Panicked(message))
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.inner, f)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error {
            inner: Context::new(ErrorKind::IO(err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            inner: Context::new(ErrorKind::Json(err)),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(err: ErrorKind) -> Self {
        Error {
            inner: Context::new(err),
        }
    }
}
