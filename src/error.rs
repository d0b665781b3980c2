use std::string::FromUtf8Error;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("position {position} is out of range (size {size})")]
    OutOfRange { position: u64, size: u64 },
    #[error("end of stream: requested {requested} bytes, {remaining} remaining")]
    EndOfStream { requested: u64, remaining: u64 },
    #[error("unsupported value: {0}")]
    UnsupportedValue(String),
    #[error("invalid utf-8 text: {0}")]
    InvalidText(#[from] FromUtf8Error),
    #[error("invalid box size {size} at offset {offset}")]
    InvalidBoxSize { offset: u64, size: u64 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Error::UnsupportedValue(msg.into())
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        use std::io::ErrorKind;
        let kind = match e {
            Error::Io(inner) => return inner,
            Error::EndOfStream { .. } => ErrorKind::UnexpectedEof,
            Error::OutOfRange { .. } => ErrorKind::InvalidInput,
            _ => ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, e)
    }
}
