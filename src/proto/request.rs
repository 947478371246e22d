/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::{borrow::Cow, fmt::Display};

/// A single client command, encoded on the wire as `COMMAND[SEP ARGUMENT]\r\n`.
///
/// The separator is a space except for `MAIL FROM` and `RCPT TO`, which glue
/// their path argument with a colon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    command: Cow<'static, str>,
    argument: Option<Cow<'static, str>>,
    separator: char,
}

impl Request {
    pub const QUIT: Request = Request::constant("QUIT");
    pub const STARTTLS: Request = Request::constant("STARTTLS");
    pub const DATA: Request = Request::constant("DATA");
    pub const NOOP: Request = Request::constant("NOOP");
    pub const RSET: Request = Request::constant("RSET");
    pub const AUTH_LOGIN: Request = Request {
        command: Cow::Borrowed("AUTH"),
        argument: Some(Cow::Borrowed("LOGIN")),
        separator: ' ',
    };

    const fn constant(command: &'static str) -> Self {
        Request {
            command: Cow::Borrowed(command),
            argument: None,
            separator: ' ',
        }
    }

    /// Builds an EHLO greeting for the given client hostname.
    pub fn ehlo(hostname: impl Into<Cow<'static, str>>) -> Self {
        Request {
            command: "EHLO".into(),
            argument: Some(hostname.into()),
            separator: ' ',
        }
    }

    /// Builds a HELO greeting for the given client hostname.
    pub fn helo(hostname: impl Into<Cow<'static, str>>) -> Self {
        Request {
            command: "HELO".into(),
            argument: Some(hostname.into()),
            separator: ' ',
        }
    }

    /// Builds a MAIL FROM command. A missing sender produces the null
    /// reverse-path `<>` used for delivery status notifications.
    pub fn mail(sender: Option<&str>, eight_bit: bool) -> Self {
        let mut argument = format!("<{}>", sender.unwrap_or(""));
        if eight_bit {
            argument.push_str(" BODY=8BITMIME");
        }
        Request {
            command: "MAIL FROM".into(),
            argument: Some(argument.into()),
            separator: ':',
        }
    }

    /// Builds a RCPT TO command for one recipient address.
    pub fn rcpt(address: &str) -> Self {
        Request {
            command: "RCPT TO".into(),
            argument: Some(format!("<{}>", address).into()),
            separator: ':',
        }
    }

    /// Builds an AUTH PLAIN command carrying the initial response inline,
    /// completing the exchange in a single round trip.
    pub fn auth_plain(initial: String) -> Self {
        Request {
            command: "AUTH".into(),
            argument: Some(format!("PLAIN {}", initial).into()),
            separator: ' ',
        }
    }

    /// Builds a bare continuation line, used for base64 responses to
    /// authentication challenges.
    pub fn payload(line: String) -> Self {
        Request {
            command: line.into(),
            argument: None,
            separator: ' ',
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Returns the CRLF-terminated wire form of this request.
    pub fn to_wire(&self) -> String {
        format!("{}\r\n", self)
    }
}

impl Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.command)?;
        if let Some(argument) = &self.argument {
            write!(f, "{}{}", self.separator, argument)?;
        }
        Ok(())
    }
}

/// An ordered batch of requests transmitted in a single network write when
/// the server supports pipelining. Responses arrive in the same order, one
/// per request, except for the final response to DATA which is deferred
/// until after the message body has been transmitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelinedRequest {
    requests: Vec<Request>,
}

impl PipelinedRequest {
    pub fn new() -> Self {
        PipelinedRequest {
            requests: Vec::new(),
        }
    }

    pub fn push(&mut self, request: Request) {
        self.requests.push(request);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Request> {
        self.requests.iter()
    }

    /// Returns the wire form of the whole batch.
    pub fn to_wire(&self) -> String {
        let mut wire = String::with_capacity(self.requests.len() * 32);
        for request in &self.requests {
            wire.push_str(&request.to_wire());
        }
        wire
    }
}

impl From<Vec<Request>> for PipelinedRequest {
    fn from(requests: Vec<Request>) -> Self {
        PipelinedRequest { requests }
    }
}

#[cfg(test)]
mod test {
    use super::{PipelinedRequest, Request};

    #[test]
    fn request_encoding() {
        for (request, wire) in [
            (Request::QUIT, "QUIT\r\n"),
            (Request::STARTTLS, "STARTTLS\r\n"),
            (Request::DATA, "DATA\r\n"),
            (Request::NOOP, "NOOP\r\n"),
            (Request::RSET, "RSET\r\n"),
            (Request::AUTH_LOGIN, "AUTH LOGIN\r\n"),
            (Request::ehlo("foobar.com"), "EHLO foobar.com\r\n"),
            (Request::helo("foobar.com"), "HELO foobar.com\r\n"),
            (
                Request::mail("jdoe@example.org".into(), false),
                "MAIL FROM:<jdoe@example.org>\r\n",
            ),
            (
                Request::mail("jdoe@example.org".into(), true),
                "MAIL FROM:<jdoe@example.org> BODY=8BITMIME\r\n",
            ),
            (Request::mail(None, false), "MAIL FROM:<>\r\n"),
            (
                Request::rcpt("jane@example.com"),
                "RCPT TO:<jane@example.com>\r\n",
            ),
            (
                Request::auth_plain("AHRpbQB0YW5zdGFhZnRhbnN0YWFm".to_string()),
                "AUTH PLAIN AHRpbQB0YW5zdGFhZnRhbnN0YWFm\r\n",
            ),
            (Request::payload("dGlt".to_string()), "dGlt\r\n"),
        ] {
            assert_eq!(request.to_wire(), wire);
        }
    }

    #[test]
    fn pipelined_encoding() {
        let mut batch = PipelinedRequest::new();
        batch.push(Request::mail("jdoe@example.org".into(), false));
        batch.push(Request::rcpt("jane@example.com"));
        batch.push(Request::rcpt("james@test.com"));
        batch.push(Request::DATA);

        assert_eq!(batch.len(), 4);
        assert_eq!(
            batch.to_wire(),
            concat!(
                "MAIL FROM:<jdoe@example.org>\r\n",
                "RCPT TO:<jane@example.com>\r\n",
                "RCPT TO:<james@test.com>\r\n",
                "DATA\r\n",
            )
        );
    }
}
