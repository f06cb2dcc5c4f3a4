//! SASL mechanisms usable with `AUTHENTICATE` and an initial response (SASL-IR).

use std::fmt::{Display, Formatter};

use base64::{engine::general_purpose::STANDARD as base64, Engine};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// RFC4616: The PLAIN Simple Authentication and Security Layer (SASL) Mechanism
    Plain,
    /// OAuth 2.0 bearer token, e.g., for Gmail.
    XOAuth2,
}

impl AuthMechanism {
    /// The base64-encoded initial response for `username` and `secret` (password or token).
    pub fn initial_response(&self, username: &str, secret: &str) -> String {
        let data = match self {
            AuthMechanism::Plain => format!("\x00{username}\x00{secret}"),
            AuthMechanism::XOAuth2 => format!("user={username}\x01auth=Bearer {secret}\x01\x01"),
        };

        base64.encode(data)
    }
}

impl Display for AuthMechanism {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(match self {
            AuthMechanism::Plain => "PLAIN",
            AuthMechanism::XOAuth2 => "XOAUTH2",
        })
    }
}
