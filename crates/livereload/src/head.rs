//! Structured request header as it sits in the connection buffer.
//!
//! The encoding is four newline-terminated fields: request id, verb, path and
//! a `0`/`1` flag telling whether body bytes remain to be read.

use std::fmt;

use thiserror::Error;

use crate::queue::RequestId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Other(String),
}

impl Verb {
    pub fn from_method(method: &str) -> Self {
        match method {
            "GET" => Verb::Get,
            "POST" => Verb::Post,
            other => Verb::Other(other.to_string()),
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Other(other) => other,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHead {
    pub id: RequestId,
    pub verb: Verb,
    pub path: String,
    pub more_body: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeadError {
    #[error("request header is not valid UTF-8")]
    Encoding,
    #[error("request header is missing the {0} field")]
    Missing(&'static str),
    #[error("request header has a malformed {0} field")]
    Malformed(&'static str),
}

impl RequestHead {
    pub fn encoded_len(&self) -> usize {
        self.encode().len()
    }

    /// Copies the encoded header into `buf`.
    ///
    /// Returns the number of bytes written, or `Err(required)` when `buf` is
    /// shorter than the encoding.
    pub fn write_to(&self, buf: &mut [u8]) -> Result<usize, usize> {
        let encoded = self.encode();
        if encoded.len() > buf.len() {
            return Err(encoded.len());
        }
        buf[..encoded.len()].copy_from_slice(encoded.as_bytes());
        Ok(encoded.len())
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, HeadError> {
        let text = std::str::from_utf8(bytes).map_err(|_| HeadError::Encoding)?;
        let mut fields = text.split('\n');

        let id = fields
            .next()
            .filter(|field| !field.is_empty())
            .ok_or(HeadError::Missing("id"))?
            .parse::<u64>()
            .map(RequestId)
            .map_err(|_| HeadError::Malformed("id"))?;
        let verb = fields
            .next()
            .filter(|field| !field.is_empty())
            .map(Verb::from_method)
            .ok_or(HeadError::Missing("verb"))?;
        let path = fields
            .next()
            .filter(|field| !field.is_empty())
            .ok_or(HeadError::Missing("path"))?
            .to_string();
        let more_body = match fields.next() {
            Some("1") => true,
            Some("0") => false,
            Some(_) => return Err(HeadError::Malformed("body flag")),
            None => return Err(HeadError::Missing("body flag")),
        };

        Ok(Self {
            id,
            verb,
            path,
            more_body,
        })
    }

    fn encode(&self) -> String {
        format!(
            "{}\n{}\n{}\n{}\n",
            self.id.0,
            self.verb,
            self.path,
            if self.more_body { 1 } else { 0 }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(path: &str) -> RequestHead {
        RequestHead {
            id: RequestId(42),
            verb: Verb::Post,
            path: path.to_string(),
            more_body: true,
        }
    }

    #[test]
    fn write_reports_required_size_when_buffer_is_short() {
        let head = head("/passes/0/fragment");
        let mut small = [0u8; 8];
        assert_eq!(head.write_to(&mut small), Err(head.encoded_len()));

        let mut large = vec![0u8; head.encoded_len()];
        let written = head.write_to(&mut large).unwrap();
        assert_eq!(RequestHead::parse(&large[..written]).unwrap(), head);
    }

    #[test]
    fn unknown_methods_are_preserved() {
        assert_eq!(Verb::from_method("PUT"), Verb::Other("PUT".into()));
        assert_eq!(Verb::from_method("GET"), Verb::Get);
    }

    #[test]
    fn parse_rejects_truncated_header() {
        assert_eq!(
            RequestHead::parse(b"7\nPOST\n"),
            Err(HeadError::Missing("path"))
        );
        assert_eq!(
            RequestHead::parse(b"x\nPOST\n/\n0\n"),
            Err(HeadError::Malformed("id"))
        );
        assert_eq!(RequestHead::parse(&[0xff, 0xfe]), Err(HeadError::Encoding));
    }
}
