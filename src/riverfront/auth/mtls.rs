//! Mutual TLS authentication (§4.C): when a client certificate is presented
//! over a connection configured for `mTLS` endpoint security, the verified
//! peer certificate's Common Name is trusted as the authenticated username
//! directly — no password or token exchange follows.

use x509_parser::prelude::{FromDer, X509Certificate};

use crate::riverfront::{Error, Result};

/// Extracts the CN (Common Name) from a DER-encoded leaf certificate already
/// validated by rustls's certificate verifier; this function only concerns
/// itself with binding the CN to a username, not with trust establishment.
pub fn username_from_peer_certificate(der: &[u8]) -> Result<String> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|_| Error::authentication_failed())?;
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(|s| s.to_string())
        .ok_or_else(Error::authentication_failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_der_fails_closed() {
        let err = username_from_peer_certificate(&[0u8, 1, 2, 3]).unwrap_err();
        assert_eq!(err.client_kind(), crate::riverfront::common::ClientErrorKind::AuthenticationError);
    }
}
