// https://redis.io/docs/reference/protocol-spec

use bytes::Buf;
use bytes::Bytes;
use std::io::Cursor;
use std::string::FromUtf8Error;
use thiserror::Error as ThisError;

pub(crate) static CRLF: &[u8; 2] = b"\r\n";

/// Deepest array nesting accepted in a reply. Parsing recurses once per level.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("not enough data is available to parse an entire frame")]
    Incomplete,
    #[error("invalid frame data type: {0}")]
    InvalidDataType(u8),
    #[error("{0}")]
    Other(String),
}

/// A single reply value sent by the server.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    /// A bulk string already decoded to text. Only produced by readers configured to decode
    /// responses.
    Text(String),
    Null,
    Array(Vec<Frame>),
}

// Protocol specification: https://redis.io/docs/reference/protocol-spec/
impl Frame {
    pub fn parse(src: &mut Cursor<&[u8]>) -> Result<Self, Error> {
        Self::parse_nested(src, 0)
    }

    fn parse_nested(src: &mut Cursor<&[u8]>, depth: usize) -> Result<Self, Error> {
        // The first byte in an RESP-serialized payload always identifies its type.
        // Subsequent bytes constitute the type's contents.
        let first_byte = get_byte(src)?;
        let data_type = DataType::try_from(first_byte)?;

        match data_type {
            DataType::SimpleString => {
                let bytes = get_line(src)?.to_vec();
                let string = String::from_utf8(bytes)?;
                Ok(Frame::Simple(string))
            }
            DataType::SimpleError => {
                let bytes = get_line(src)?.to_vec();
                let string = String::from_utf8(bytes)?;
                Ok(Frame::Error(string))
            }
            DataType::Integer => {
                let integer = get_integer(src)?;
                Ok(Frame::Integer(integer))
            }
            // $<length>\r\n<data>\r\n
            DataType::BulkString => match get_length(src)? {
                None => Ok(Frame::Null),
                Some(length) => {
                    let data = get_exact(src, length)?;
                    Ok(Frame::Bulk(Bytes::copy_from_slice(data)))
                }
            },
            // !<length>\r\n<error>\r\n
            DataType::BulkError => match get_length(src)? {
                // NOTE: the protocol does not specify a way to represent a null bulk error
                None => Ok(Frame::Null),
                Some(length) => {
                    let msg = get_exact(src, length)?.to_vec();
                    let msg = String::from_utf8(msg)?;
                    Ok(Frame::Error(msg))
                }
            },
            // *<number-of-elements>\r\n<element-1>...<element-n>
            DataType::Array => match get_length(src)? {
                None => Ok(Frame::Null),
                Some(_) if depth >= MAX_DEPTH => Err(depth_exceeded()),
                Some(length) => {
                    // The declared length is untrusted, don't let it drive the allocation.
                    let mut frames = Vec::with_capacity(length.min(1024));
                    for _ in 0..length {
                        let frame = Self::parse_nested(src, depth + 1)?;
                        frames.push(frame);
                    }
                    Ok(Frame::Array(frames))
                }
            },
            DataType::Null => {
                // Advance the cursor to the end of the frame.
                let _ = get_line(src)?;

                Ok(Frame::Null)
            }
            data_type => Err(unsupported(data_type)),
        }
    }

    /// Moves the cursor past the next value without building it. Arrays are only stepped into:
    /// the cursor stops after their header and the number of elements that follow is returned.
    /// Empty and null arrays are complete values and return `None`, like every other type.
    ///
    /// Fails with [`Error::Incomplete`] under the same conditions as [`Frame::parse`].
    pub fn check(src: &mut Cursor<&[u8]>) -> Result<Option<usize>, Error> {
        let data_type = DataType::try_from(get_byte(src)?)?;

        match data_type {
            DataType::SimpleString | DataType::SimpleError | DataType::Null => {
                get_line(src)?;
            }
            DataType::Integer => {
                get_integer(src)?;
            }
            DataType::BulkString | DataType::BulkError => {
                if let Some(length) = get_length(src)? {
                    get_exact(src, length)?;
                }
            }
            DataType::Array => return Ok(get_length(src)?.filter(|&length| length > 0)),
            data_type => return Err(unsupported(data_type)),
        }

        Ok(None)
    }
}

pub(crate) fn depth_exceeded() -> Error {
    format!("nesting depth limit of {} exceeded", MAX_DEPTH).into()
}

fn unsupported(data_type: DataType) -> Error {
    format!("unsupported data type: {:?}", data_type).into()
}

/// Returns the bytes up to the next CRLF and moves the cursor past it.
fn get_line<'a>(src: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let end = src.get_ref().len();

    let line_end_position = src.get_ref()[start..end]
        .windows(2)
        .position(|window| window == CRLF)
        .ok_or(Error::Incomplete)
        .map(|index| start + index)?;

    src.set_position((line_end_position + CRLF.len()) as u64);

    Ok(&src.get_ref()[start..line_end_position])
}

/// Returns exactly `length` bytes followed by a CRLF. Bulk payloads are binary, so the CRLF can't
/// be searched for.
fn get_exact<'a>(src: &mut Cursor<&'a [u8]>, length: usize) -> Result<&'a [u8], Error> {
    let start = src.position() as usize;
    let end = start + length;

    if src.get_ref().len() < end + CRLF.len() {
        return Err(Error::Incomplete);
    }

    if &src.get_ref()[end..end + CRLF.len()] != CRLF {
        return Err("invalid frame format; bulk payload is not terminated by CRLF".into());
    }

    src.set_position((end + CRLF.len()) as u64);

    Ok(&src.get_ref()[start..end])
}

fn get_integer(src: &mut Cursor<&[u8]>) -> Result<i64, Error> {
    let line = get_line(src)?;
    let string = String::from_utf8(line.to_vec())?;
    string
        .parse::<i64>()
        .map_err(|e| Error::Other(format!("invalid integer {:?}: {}", string, e)))
}

/// Parses the length header of aggregate and bulk types. `-1` stands for null.
fn get_length(src: &mut Cursor<&[u8]>) -> Result<Option<usize>, Error> {
    match get_integer(src)? {
        -1 => Ok(None),
        length if length < -1 => Err(format!("invalid frame length: {}", length).into()),
        length => Ok(Some(length as usize)),
    }
}

fn get_byte(src: &mut Cursor<&[u8]>) -> Result<u8, Error> {
    if !src.has_remaining() {
        return Err(Error::Incomplete);
    }
    Ok(src.get_u8())
}

#[derive(Debug)]
enum DataType {
    SimpleString,   // '+'
    BulkString,     // '$'
    VerbatimString, // '='
    SimpleError,    // '-'
    BulkError,      // '!'
    Boolean,        // '#'
    Integer,        // ':'
    Double,         // ','
    BigNumber,      // '('
    Array,          // '*'
    Map,            // '%'
    Set,            // '~'
    Push,           // '>'
    // Due to historical reasons, RESP2 features two specially crafted values for representing null
    // values of bulk strings and arrays. This duality has always been a redundancy that added zero
    // semantical value to the protocol itself. The null type, introduced in RESP3, aims to fix
    // this wrong.
    Null, // '_'
}

impl TryFrom<u8> for DataType {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            b'+' => Ok(Self::SimpleString),
            b'-' => Ok(Self::SimpleError),
            b':' => Ok(Self::Integer),
            b'$' => Ok(Self::BulkString),
            b'!' => Ok(Self::BulkError),
            b'*' => Ok(Self::Array),
            b'_' => Ok(Self::Null),
            b'#' => Ok(Self::Boolean),
            b',' => Ok(Self::Double),
            b'(' => Ok(Self::BigNumber),
            b'=' => Ok(Self::VerbatimString),
            b'%' => Ok(Self::Map),
            b'~' => Ok(Self::Set),
            b'>' => Ok(Self::Push),
            _ => Err(Error::InvalidDataType(byte)),
        }
    }
}

impl From<FromUtf8Error> for Error {
    fn from(_src: FromUtf8Error) -> Error {
        "invalid frame format; expected utf-8 text".into()
    }
}

impl From<&str> for Error {
    fn from(src: &str) -> Error {
        src.to_string().into()
    }
}

impl From<String> for Error {
    fn from(src: String) -> Error {
        Error::Other(src)
    }
}
