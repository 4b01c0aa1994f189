//! JWT bearer-token authentication (§4.C, §6): token version is carried in
//! the prefix (`edbt_`/`edbt1_`/`nbwt_`/`nbwt1_`), not just the `alg` header,
//! so a legacy v0 token and a versioned v1 token are parsed with different
//! claim namespaces even when both happen to use the same signing algorithm.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::riverfront::{Error, Result};

const EDB_LEGACY_PREFIX: &str = "edbt_";
const EDB_V1_PREFIX: &str = "edbt1_";
const NB_LEGACY_PREFIX: &str = "nbwt_";
const NB_V1_PREFIX: &str = "nbwt1_";

/// The resolved scope/role claims from a verified token, independent of
/// which prefix/version produced them.
#[derive(Debug, Clone, Default)]
pub struct TokenClaims {
    pub subject: Option<String>,
    /// Fully expanded role/instance scopes, e.g. `edb.r.<role>`, `edb.i.<instance>`,
    /// `edb.d.<database>`. `edb.all` (or the legacy instance wildcard) expands
    /// implicitly to "every scope this check could ask for".
    pub scopes: Vec<String>,
}

impl TokenClaims {
    /// True if the token authorizes `scope`, honoring the `.all` bypass.
    pub fn allows(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope || s == "edb.all")
    }
}

#[derive(Deserialize)]
struct V1Claims {
    sub: Option<String>,
    #[serde(default, rename = "edb.r")]
    roles: Vec<String>,
    #[serde(default, rename = "edb.i")]
    instances: Vec<String>,
    #[serde(default, rename = "edb.d")]
    databases: Vec<String>,
    #[serde(default, rename = "edb.all")]
    all: bool,
}

#[derive(Deserialize)]
struct LegacyClaims {
    sub: Option<String>,
    #[serde(default, rename = "edgedb.server.any_role")]
    any_role: bool,
    #[serde(default, rename = "edgedb.server.roles")]
    roles: Vec<String>,
}

fn decoding_key_for(alg: Algorithm, key_pem: &[u8]) -> Result<DecodingKey<'_>> {
    match alg {
        Algorithm::RS256 => DecodingKey::from_rsa_pem(key_pem).map_err(|_| Error::authentication_failed()),
        Algorithm::ES256 => DecodingKey::from_ec_pem(key_pem).map_err(|_| Error::authentication_failed()),
        _ => Err(Error::unsupported_feature("unsupported JWT signing algorithm")),
    }
}

/// Resolver for the signing key(s) this cluster trusts, keyed by the
/// `kid`/algorithm the token declares. An external collaborator: key
/// rotation and storage live outside this module.
pub trait JwtKeyStore: Send + Sync {
    fn signing_key_pem(&self, alg: Algorithm) -> Option<Vec<u8>>;
}

fn validation_for(alg: Algorithm) -> Validation {
    let mut v = Validation::new(alg);
    v.validate_exp = true;
    v
}

fn verify_and_decode<T: for<'de> Deserialize<'de>>(
    store: &dyn JwtKeyStore,
    token: &str,
) -> Result<T> {
    // Try each algorithm we accept; jsonwebtoken checks the header's `alg`
    // against what we pass in, so trying both is how we discover which one
    // the token actually declares without a separate unverified parse.
    for alg in [Algorithm::RS256, Algorithm::ES256] {
        let key_pem = match store.signing_key_pem(alg) {
            Some(k) => k,
            None => continue,
        };
        let key = decoding_key_for(alg, &key_pem)?;
        if let Ok(data) = decode::<T>(token, &key, &validation_for(alg)) {
            return Ok(data.claims);
        }
    }
    Err(Error::authentication_failed())
}

/// Verifies a bearer token of any supported prefix and returns its resolved
/// claims. The prefix is stripped before the remaining string is treated as
/// the actual compact JWT.
pub fn verify_bearer_token(store: &dyn JwtKeyStore, token: &str) -> Result<TokenClaims> {
    if let Some(jwt) = token.strip_prefix(EDB_V1_PREFIX).or_else(|| token.strip_prefix(NB_V1_PREFIX)) {
        let claims: V1Claims = verify_and_decode(store, jwt)?;
        let mut scopes: Vec<String> = Vec::new();
        scopes.extend(claims.roles.into_iter().map(|r| format!("edb.r.{}", r)));
        scopes.extend(claims.instances.into_iter().map(|i| format!("edb.i.{}", i)));
        scopes.extend(claims.databases.into_iter().map(|d| format!("edb.d.{}", d)));
        if claims.all {
            scopes.push("edb.all".to_string());
        }
        Ok(TokenClaims { subject: claims.sub, scopes })
    } else if let Some(jwt) = token.strip_prefix(EDB_LEGACY_PREFIX).or_else(|| token.strip_prefix(NB_LEGACY_PREFIX)) {
        let claims: LegacyClaims = verify_and_decode(store, jwt)?;
        let mut scopes: Vec<String> = claims.roles.into_iter().map(|r| format!("edb.r.{}", r)).collect();
        if claims.any_role {
            scopes.push("edb.all".to_string());
        }
        Ok(TokenClaims { subject: claims.sub, scopes })
    } else {
        Err(Error::protocol_violation("unrecognized bearer token prefix"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoKeys;
    impl JwtKeyStore for NoKeys {
        fn signing_key_pem(&self, _alg: Algorithm) -> Option<Vec<u8>> {
            None
        }
    }

    #[test]
    fn unrecognized_prefix_is_protocol_violation() {
        let err = verify_bearer_token(&NoKeys, "whatever.not.a.token").unwrap_err();
        assert_eq!(err.client_kind(), crate::riverfront::common::ClientErrorKind::ProtocolViolation);
    }

    #[test]
    fn no_trusted_key_fails_closed() {
        let err = verify_bearer_token(&NoKeys, "edbt1_not.a.realjwt").unwrap_err();
        assert_eq!(err.client_kind(), crate::riverfront::common::ClientErrorKind::AuthenticationError);
    }

    #[test]
    fn v1_all_scope_allows_everything() {
        let claims = TokenClaims { subject: Some("admin".into()), scopes: vec!["edb.all".into()] };
        assert!(claims.allows("edb.d.mydb"));
    }

    #[test]
    fn scoped_claims_reject_other_scopes() {
        let claims = TokenClaims { subject: Some("svc".into()), scopes: vec!["edb.d.mydb".into()] };
        assert!(!claims.allows("edb.d.otherdb"));
    }
}
