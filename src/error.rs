//! The retrolink error type

use core::fmt;
use core::result;
use std::{error, io};

#[derive(Debug)]
/// A fatal linking error; recoverable conditions go through
/// [`crate::diag::Diagnostics`] instead
pub enum Error {
    /// An input file could not be interpreted
    Malformed(String),
    /// The file's magic is unknown or bad
    BadMagic(u64),
    /// An error emanating from reading and interpreting bytes
    Scroll(scroll::Error),
    /// An IO based error
    IO(io::Error),
    /// No registered output format under this name
    UnknownFormat(String),
    /// The linker script could not be parsed
    InvalidScript(String),
    /// A script parameter is missing or not a number
    InvalidScriptParameter(String),
    /// Data was appended to a zero-filled section
    ZeroFilledSection(String),
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IO(ref io) => Some(io),
            Error::Scroll(ref scroll) => Some(scroll),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IO(err)
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Error {
        Error::Scroll(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::IO(ref err) => write!(fmt, "{err}"),
            Error::Scroll(ref err) => write!(fmt, "{err}"),
            Error::Malformed(ref msg) => write!(fmt, "Malformed entity: {msg}"),
            Error::BadMagic(magic) => write!(fmt, "Invalid magic number: 0x{magic:x}"),
            Error::UnknownFormat(ref name) => write!(fmt, "Unknown format: {name}"),
            Error::InvalidScript(ref msg) => write!(fmt, "Invalid linker script: {msg}"),
            Error::InvalidScriptParameter(ref name) => {
                write!(fmt, "Invalid linker script parameter: {name}")
            }
            Error::ZeroFilledSection(ref name) => {
                write!(fmt, "Data stored in zero-filled section {name}")
            }
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
