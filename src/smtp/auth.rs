/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{convert::TryFrom, fmt::Display};

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::proto::response::Response;

/// Authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// Plain (RFC 4616), sent as a single round trip with the initial
    /// response inline.
    Plain,

    /// Login, a two-challenge exchange of base64 username and password.
    Login,
}

impl TryFrom<&str> for Mechanism {
    type Error = ();

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        if s.eq_ignore_ascii_case("PLAIN") {
            Ok(Mechanism::Plain)
        } else if s.eq_ignore_ascii_case("LOGIN") {
            Ok(Mechanism::Login)
        } else {
            Err(())
        }
    }
}

impl Display for Mechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mechanism::Plain => write!(f, "PLAIN"),
            Mechanism::Login => write!(f, "LOGIN"),
        }
    }
}

/// Account credentials paired with the mechanism to authenticate with.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    secret: String,
    mechanism: Mechanism,
}

impl Credentials {
    /// Creates credentials for the PLAIN mechanism.
    pub fn plain(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            secret: secret.into(),
            mechanism: Mechanism::Plain,
        }
    }

    /// Creates credentials for the LOGIN mechanism.
    pub fn login(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Credentials {
            username: username.into(),
            secret: secret.into(),
            mechanism: Mechanism::Login,
        }
    }

    pub fn mechanism(&self) -> Mechanism {
        self.mechanism
    }

    /// The PLAIN initial response: base64 of `\0username\0secret`.
    pub(crate) fn plain_payload(&self) -> String {
        STANDARD.encode(format!("\u{0}{}\u{0}{}", self.username, self.secret))
    }

    pub(crate) fn username_payload(&self) -> String {
        STANDARD.encode(&self.username)
    }

    pub(crate) fn secret_payload(&self) -> String {
        STANDARD.encode(&self.secret)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("mechanism", &self.mechanism)
            .finish_non_exhaustive()
    }
}

/// Decodes the base64 challenge lines of a LOGIN exchange so that failure
/// reports carry readable text. Lines that do not decode are kept as-is.
pub(crate) fn decode_challenge(response: &Response) -> Response {
    Response::new(
        response.code(),
        response
            .lines()
            .iter()
            .map(|line| match STANDARD.decode(line.trim()) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => line.clone(),
            })
            .collect(),
    )
}
