//! HTTP Basic authentication (§4.C, §6): `Authorization: Basic <base64>`,
//! decoded and split on the first `:` per RFC 7617 (a password may itself
//! contain `:`, a username may not).

use crate::riverfront::{Error, Result};

pub struct BasicCredentials {
    pub user: String,
    pub password: String,
}

pub fn parse_basic_auth_header(header_value: &str) -> Result<BasicCredentials> {
    let encoded = header_value
        .strip_prefix("Basic ")
        .ok_or_else(|| Error::protocol_violation("expected Basic authorization scheme"))?;
    let decoded = base64::decode(encoded.trim()).map_err(|_| Error::protocol_violation("malformed base64 in Basic auth header"))?;
    let decoded = String::from_utf8(decoded).map_err(|_| Error::protocol_violation("non-UTF-8 Basic auth credentials"))?;
    let (user, password) = decoded
        .split_once(':')
        .ok_or_else(|| Error::protocol_violation("missing ':' separator in Basic auth credentials"))?;
    Ok(BasicCredentials { user: user.to_string(), password: password.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_user_and_password() {
        // "alice:s3cr3t:with:colons" base64-encoded
        let encoded = base64::encode("alice:s3cr3t:with:colons");
        let header = format!("Basic {}", encoded);
        let creds = parse_basic_auth_header(&header).unwrap();
        assert_eq!(creds.user, "alice");
        assert_eq!(creds.password, "s3cr3t:with:colons");
    }

    #[test]
    fn rejects_non_basic_scheme() {
        let err = parse_basic_auth_header("Bearer abc").unwrap_err();
        assert_eq!(err.client_kind(), crate::riverfront::common::ClientErrorKind::ProtocolViolation);
    }
}
