/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::convert::TryFrom;
use std::str::FromStr;

use super::response::Response;
use crate::smtp::auth::Mechanism;

/// The set of recognized extensions advertised in an EHLO response. A HELO
/// greeting negotiates nothing and leaves the set empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    pipelining: bool,
    starttls: bool,
    eight_bit_mime: bool,
    auth: Vec<Mechanism>,
    size: Option<usize>,
}

impl Extensions {
    /// Scans the continuation lines of an EHLO response for recognized
    /// extension keywords. Unrecognized lines are ignored.
    pub fn parse(response: &Response) -> Self {
        let mut extensions = Extensions::default();

        for line in response.lines().iter().skip(1) {
            let mut tokens = line.split(' ');
            match tokens
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase()
                .as_str()
            {
                "PIPELINING" => extensions.pipelining = true,
                "STARTTLS" => extensions.starttls = true,
                "8BITMIME" => extensions.eight_bit_mime = true,
                "AUTH" => {
                    extensions.auth = tokens
                        .filter_map(|mechanism| Mechanism::try_from(mechanism).ok())
                        .collect();
                }
                "SIZE" => {
                    extensions.size = tokens.next().and_then(|value| usize::from_str(value).ok());
                }
                _ => (),
            }
        }

        extensions
    }

    /// Returns `true` if the server accepts pipelined command batches.
    pub fn pipelining(&self) -> bool {
        self.pipelining
    }

    /// Returns `true` if the server offers a TLS upgrade.
    pub fn starttls(&self) -> bool {
        self.starttls
    }

    /// Returns `true` if the server accepts 8-bit-clean message bodies.
    pub fn eight_bit_mime(&self) -> bool {
        self.eight_bit_mime
    }

    /// Returns the advertised authentication mechanisms.
    pub fn auth(&self) -> &[Mechanism] {
        &self.auth
    }

    /// Returns the advertised maximum message size, if any.
    pub fn size(&self) -> Option<usize> {
        self.size
    }
}

#[cfg(test)]
mod test {
    use super::Extensions;
    use crate::proto::response::ResponseParser;
    use crate::smtp::auth::Mechanism;

    fn parse(reply: &str) -> Extensions {
        Extensions::parse(
            &ResponseParser::new()
                .parse(&mut reply.as_bytes().iter())
                .unwrap(),
        )
    }

    #[test]
    fn extension_sets() {
        let extensions = parse(concat!(
            "250-foo.com greets bar.com\r\n",
            "250-8BITMIME\r\n",
            "250-SIZE 35882577\r\n",
            "250-DSN\r\n",
            "250 HELP\r\n",
        ));
        assert!(extensions.eight_bit_mime());
        assert!(!extensions.pipelining());
        assert!(!extensions.starttls());
        assert_eq!(extensions.size(), Some(35882577));

        let extensions = parse(concat!(
            "250-smtp.example.com Hello client.example.com\r\n",
            "250-AUTH GSSAPI DIGEST-MD5 PLAIN\r\n",
            "250-ENHANCEDSTATUSCODES\r\n",
            "250 STARTTLS\r\n",
        ));
        assert!(extensions.starttls());
        assert_eq!(extensions.auth(), &[Mechanism::Plain]);

        let extensions = parse(concat!(
            "250-smtp.example.com Hello client.example.com\r\n",
            "250-pipelining\r\n",
            "250 auth login plain\r\n",
        ));
        assert!(extensions.pipelining());
        assert_eq!(extensions.auth(), &[Mechanism::Login, Mechanism::Plain]);

        // A bare greeting advertises nothing
        let extensions = parse("250 xyz.com is on the air\r\n");
        assert_eq!(extensions, Extensions::default());
    }
}
