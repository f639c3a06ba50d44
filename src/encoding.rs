use std::borrow::Cow;

use strum_macros::{Display, EnumString};

use crate::Error;

/// Text encoding applied to outgoing text arguments and, when responses are decoded, to incoming
/// bulk strings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Encoding {
    #[default]
    #[strum(to_string = "utf-8", serialize = "utf8")]
    Utf8,
    #[strum(to_string = "latin-1", serialize = "latin1", serialize = "iso-8859-1")]
    Latin1,
    #[strum(to_string = "ascii", serialize = "us-ascii")]
    Ascii,
}

/// What to do with characters (or bytes) the encoding can't represent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EncodingErrors {
    /// Fail with [`Error::Encoding`].
    #[default]
    Strict,
    /// Substitute `?` when encoding and U+FFFD when decoding.
    Replace,
    /// Drop the offending character or byte.
    Ignore,
}

impl Encoding {
    /// The highest code point the encoding can represent.
    fn max_char(self) -> u32 {
        match self {
            Encoding::Utf8 => char::MAX as u32,
            Encoding::Latin1 => 0xFF,
            Encoding::Ascii => 0x7F,
        }
    }

    pub fn encode<'a>(self, text: &'a str, errors: EncodingErrors) -> Result<Cow<'a, [u8]>, Error> {
        match self {
            Encoding::Utf8 => Ok(Cow::Borrowed(text.as_bytes())),
            // ASCII text is the same in all three encodings.
            _ if text.is_ascii() => Ok(Cow::Borrowed(text.as_bytes())),
            _ => {
                let max = self.max_char();
                let mut bytes = Vec::with_capacity(text.len());
                for (position, c) in text.char_indices() {
                    if c as u32 <= max {
                        bytes.push(c as u8);
                        continue;
                    }
                    match errors {
                        EncodingErrors::Strict => {
                            return Err(Error::Encoding(format!(
                                "'{}' codec can't encode character {:?} in position {}",
                                self, c, position
                            )))
                        }
                        EncodingErrors::Replace => bytes.push(b'?'),
                        EncodingErrors::Ignore => {}
                    }
                }
                Ok(Cow::Owned(bytes))
            }
        }
    }

    pub fn decode(self, bytes: &[u8], errors: EncodingErrors) -> Result<String, Error> {
        match self {
            Encoding::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            Encoding::Utf8 => {
                let mut text = String::with_capacity(bytes.len());
                for chunk in bytes.utf8_chunks() {
                    text.push_str(chunk.valid());
                    if chunk.invalid().is_empty() {
                        continue;
                    }
                    match errors {
                        EncodingErrors::Strict => {
                            return Err(Error::Encoding(format!(
                                "'{}' codec can't decode bytes {:?} in position {}",
                                self,
                                chunk.invalid(),
                                text.len()
                            )))
                        }
                        EncodingErrors::Replace => text.push(char::REPLACEMENT_CHARACTER),
                        EncodingErrors::Ignore => {}
                    }
                }
                Ok(text)
            }
            Encoding::Ascii => {
                let mut text = String::with_capacity(bytes.len());
                for (position, &b) in bytes.iter().enumerate() {
                    if b.is_ascii() {
                        text.push(char::from(b));
                        continue;
                    }
                    match errors {
                        EncodingErrors::Strict => {
                            return Err(Error::Encoding(format!(
                                "'{}' codec can't decode byte {:#x} in position {}",
                                self, b, position
                            )))
                        }
                        EncodingErrors::Replace => text.push(char::REPLACEMENT_CHARACTER),
                        EncodingErrors::Ignore => {}
                    }
                }
                Ok(text)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_names() {
        assert_eq!("utf-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("UTF8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("latin1".parse::<Encoding>().unwrap(), Encoding::Latin1);
        assert_eq!("replace".parse::<EncodingErrors>().unwrap(), EncodingErrors::Replace);
        assert!("ebcdic".parse::<Encoding>().is_err());
    }

    #[test]
    fn display_names() {
        assert_eq!(Encoding::Utf8.to_string(), "utf-8");
        assert_eq!(Encoding::Latin1.to_string(), "latin-1");
        assert_eq!(EncodingErrors::Strict.to_string(), "strict");
    }

    #[test]
    fn encode_utf8() {
        let bytes = Encoding::Utf8.encode("héllo", EncodingErrors::Strict).unwrap();
        assert_eq!(&bytes[..], "héllo".as_bytes());
    }

    #[test]
    fn encode_latin1() {
        let bytes = Encoding::Latin1.encode("héllo", EncodingErrors::Strict).unwrap();
        assert_eq!(&bytes[..], b"h\xe9llo");
    }

    #[test]
    fn encode_policies() {
        assert!(matches!(
            Encoding::Ascii.encode("h€y", EncodingErrors::Strict),
            Err(Error::Encoding(_))
        ));
        assert_eq!(
            &Encoding::Ascii.encode("h€y", EncodingErrors::Replace).unwrap()[..],
            b"h?y"
        );
        assert_eq!(
            &Encoding::Latin1.encode("h€y", EncodingErrors::Ignore).unwrap()[..],
            b"hy"
        );
    }

    #[test]
    fn decode_utf8_policies() {
        let bytes = b"ok\xffok";
        assert!(matches!(
            Encoding::Utf8.decode(bytes, EncodingErrors::Strict),
            Err(Error::Encoding(_))
        ));
        assert_eq!(
            Encoding::Utf8.decode(bytes, EncodingErrors::Replace).unwrap(),
            "ok\u{FFFD}ok"
        );
        assert_eq!(
            Encoding::Utf8.decode(bytes, EncodingErrors::Ignore).unwrap(),
            "okok"
        );
    }

    #[test]
    fn decode_latin1_never_fails() {
        assert_eq!(
            Encoding::Latin1.decode(b"h\xe9", EncodingErrors::Strict).unwrap(),
            "hé"
        );
    }

    #[test]
    fn decode_ascii_policies() {
        assert!(Encoding::Ascii.decode(b"a\x80", EncodingErrors::Strict).is_err());
        assert_eq!(
            Encoding::Ascii.decode(b"a\x80", EncodingErrors::Ignore).unwrap(),
            "a"
        );
    }
}
