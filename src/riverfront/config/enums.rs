use serde::Deserialize;

#[derive(Deserialize, Copy, Clone, Debug)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    // Invalid, used to indicate value was not explicitly set
    Invalid,
    // Disabled do not use TLS
    Disabled,
    // Prefer use TLS when the other side of the connection permits it, and verifies the issuing CA is trusted, and the hostname matches
    Prefer,
    // Required requires TLS and verifies the issuing CA is trusted, and the hostname matches
    Required,
}

impl Default for TlsMode {
    fn default() -> Self {
        TlsMode::Invalid
    }
}

/// Policy enforced during Startup/handshake, before a client has authenticated:
/// whether a plaintext session is permitted to proceed to auth at all.
#[derive(Deserialize, Copy, Clone, Debug, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EndpointSecurity {
    Optional,
    TlsRequired,
}

impl Default for EndpointSecurity {
    fn default() -> Self {
        EndpointSecurity::TlsRequired
    }
}

/// How a given (user, transport) pair is challenged during Startup/handshake auth.
#[derive(Deserialize, Copy, Clone, Debug, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Trust,
    Scram,
    Jwt,
    Mtls,
}

impl Default for AuthMethod {
    fn default() -> Self {
        AuthMethod::Scram
    }
}
