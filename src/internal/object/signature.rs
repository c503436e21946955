//! Author and committer lines embedded in commit objects.
//!
//! A signature line has the shape
//! `author A U Thor <a.u.thor@example.com> 1757467768 +0800`; the leading
//! keyword distinguishes the author from the committer. The committer email
//! is the value the fork ingestion ownership filter checks, so parsing must
//! be faithful to what git writes.

use std::fmt::Display;

use bstr::ByteSlice;

use crate::errors::ReviewError;

/// Whether a signature line names the author or the committer.
#[derive(PartialEq, Eq, Debug, Hash, Ord, PartialOrd, Clone, Copy)]
pub enum SignatureType {
    Author,
    Committer,
}

impl SignatureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureType::Author => "author",
            SignatureType::Committer => "committer",
        }
    }

    pub fn from_data(data: &[u8]) -> Result<SignatureType, ReviewError> {
        match data {
            b"author" => Ok(SignatureType::Author),
            b"committer" => Ok(SignatureType::Committer),
            _ => Err(ReviewError::InvalidSignatureType(
                String::from_utf8_lossy(data).to_string(),
            )),
        }
    }
}

impl Display for SignatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed author/committer line.
#[derive(PartialEq, Eq, Debug, Hash, Ord, PartialOrd, Clone)]
pub struct Signature {
    pub signature_type: SignatureType,
    pub name: String,
    pub email: String,
    pub timestamp: usize,
    pub timezone: String,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} <{}> {} {}",
            self.name, self.email, self.timestamp, self.timezone
        )
    }
}

impl Signature {
    /// Build a signature for the given identity at the given epoch second.
    pub fn new(
        signature_type: SignatureType,
        name: &str,
        email: &str,
        timestamp: usize,
    ) -> Signature {
        Signature {
            signature_type,
            name: name.to_string(),
            email: email.to_string(),
            timestamp,
            timezone: "+0000".to_string(),
        }
    }

    /// Parse a full signature line, keyword included.
    pub fn from_data(data: Vec<u8>) -> Result<Signature, ReviewError> {
        let invalid = || ReviewError::InvalidSignatureType(String::from_utf8_lossy(&data).to_string());

        let keyword_end = data.find_byte(0x20).ok_or_else(invalid)?;
        let signature_type = SignatureType::from_data(&data[..keyword_end])?;
        let rest = &data[keyword_end + 1..];

        let email_open = rest.find_byte(b'<').ok_or_else(invalid)?;
        let email_close = rest.find_byte(b'>').ok_or_else(invalid)?;
        if email_close < email_open {
            return Err(invalid());
        }

        let name = rest[..email_open].trim();
        let email = rest[email_open + 1..email_close].trim();
        let tail = rest[email_close + 1..].trim();
        let mut fields = tail.split_str(" ");
        let timestamp: usize = fields
            .next()
            .and_then(|t| t.to_str().ok())
            .and_then(|t| t.parse().ok())
            .ok_or_else(invalid)?;
        let timezone = fields
            .next()
            .and_then(|t| t.to_str().ok())
            .unwrap_or("+0000")
            .to_string();

        Ok(Signature {
            signature_type,
            name: String::from_utf8_lossy(name).to_string(),
            email: String::from_utf8_lossy(email).to_string(),
            timestamp,
            timezone,
        })
    }

    /// Serialize back to the line form, keyword included.
    pub fn to_data(&self) -> Result<Vec<u8>, ReviewError> {
        Ok(format!(
            "{} {} <{}> {} {}",
            self.signature_type, self.name, self.email, self.timestamp, self.timezone
        )
        .into_bytes())
    }
}
