use bytes::{BufMut, Bytes, BytesMut};

use crate::encoding::{Encoding, EncodingErrors};
use crate::frame::CRLF;
use crate::Error;

/// A single command argument. Text is encoded with the connection's encoding, numbers are sent in
/// their canonical decimal form and bytes are sent untouched.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Text(String),
    Bytes(Bytes),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Arg {
    fn encode(&self, encoding: Encoding, errors: EncodingErrors) -> Result<Bytes, Error> {
        let bytes = match self {
            Arg::Text(s) => Bytes::from(encoding.encode(s, errors)?.into_owned()),
            Arg::Bytes(b) => b.clone(),
            Arg::Int(i) => Bytes::from(i.to_string()),
            Arg::UInt(u) => Bytes::from(u.to_string()),
            Arg::Float(f) => Bytes::from(f.to_string()),
        };
        Ok(bytes)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg::Text(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg::Text(value)
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg::Text(value.clone())
    }
}

impl From<Bytes> for Arg {
    fn from(value: Bytes) -> Self {
        Arg::Bytes(value)
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Arg::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Arg::Bytes(Bytes::from(value))
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Arg::Int(value)
    }
}

impl From<i32> for Arg {
    fn from(value: i32) -> Self {
        Arg::Int(value.into())
    }
}

impl From<u32> for Arg {
    fn from(value: u32) -> Self {
        Arg::UInt(value.into())
    }
}

impl From<u64> for Arg {
    fn from(value: u64) -> Self {
        Arg::UInt(value)
    }
}

impl From<usize> for Arg {
    fn from(value: usize) -> Self {
        Arg::UInt(value as u64)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Arg::Float(value)
    }
}

/// Packs the arguments into a RESP array of bulk strings, the form clients send commands in:
/// `*<count>\r\n` followed by `$<length>\r\n<bytes>\r\n` per argument.
pub fn pack_command(
    args: &[Arg],
    encoding: Encoding,
    errors: EncodingErrors,
) -> Result<Bytes, Error> {
    let mut packed = BytesMut::new();
    put_header(&mut packed, b'*', args.len());

    for arg in args {
        let bytes = arg.encode(encoding, errors)?;
        put_header(&mut packed, b'$', bytes.len());
        packed.put_slice(&bytes);
        packed.put_slice(CRLF);
    }

    Ok(packed.freeze())
}

fn put_header(dst: &mut BytesMut, prefix: u8, length: usize) {
    dst.put_u8(prefix);
    dst.put_slice(length.to_string().as_bytes());
    dst.put_slice(CRLF);
}
