/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::fmt::Display;

const MAX_RESPONSE_LENGTH: usize = 4096;

/// A complete server response: a three-digit reply code and the ordered text
/// lines that carried it. Multi-line responses use a `-` separator on every
/// line but the last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    code: u16,
    lines: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    PositiveCompletion = 2,
    PositiveIntermediate = 3,
    TransientNegativeCompletion = 4,
    PermanentNegativeCompletion = 5,
    Invalid = 0,
}

impl Response {
    pub fn new(code: u16, lines: Vec<String>) -> Self {
        Response { code, lines }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn severity(&self) -> Severity {
        match self.code / 100 {
            2 => Severity::PositiveCompletion,
            3 => Severity::PositiveIntermediate,
            4 => Severity::TransientNegativeCompletion,
            5 => Severity::PermanentNegativeCompletion,
            _ => Severity::Invalid,
        }
    }

    /// Returns `true` for 2xx replies.
    pub fn is_positive_completion(&self) -> bool {
        self.severity() == Severity::PositiveCompletion
    }

    /// Returns `true` for 3xx replies, such as the 354 answer to DATA.
    pub fn is_positive_intermediate(&self) -> bool {
        self.severity() == Severity::PositiveIntermediate
    }
}

impl Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.lines.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid reply code")]
    InvalidCode,
    #[error("invalid line separator")]
    InvalidSeparator,
    #[error("reply code changed between lines")]
    CodeMismatch,
    #[error("reply text too long")]
    TooLong,
    #[error("incomplete reply")]
    NeedsMoreData,
}

#[derive(Debug, Clone, Copy)]
enum Stage {
    Code,
    Separator,
    Text,
}

/// Incremental response decoder. Bytes may be fed in arbitrary chunks; the
/// parser keeps its position across calls and leaves unconsumed bytes on the
/// iterator, so several responses can be drained from a single segment.
#[derive(Debug)]
pub struct ResponseParser {
    stage: Stage,
    code: Option<u16>,
    line_code: u16,
    digits: u8,
    terminal: bool,
    buf: Vec<u8>,
    lines: Vec<String>,
    total: usize,
}

impl Default for ResponseParser {
    fn default() -> Self {
        ResponseParser {
            stage: Stage::Code,
            code: None,
            line_code: 0,
            digits: 0,
            terminal: false,
            buf: Vec::with_capacity(128),
            lines: Vec::with_capacity(4),
            total: 0,
        }
    }
}

impl ResponseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.stage = Stage::Code;
        self.code = None;
        self.line_code = 0;
        self.digits = 0;
        self.terminal = false;
        self.buf.clear();
        self.lines.clear();
        self.total = 0;
    }

    pub fn parse(&mut self, bytes: &mut std::slice::Iter<'_, u8>) -> Result<Response, ParseError> {
        for &byte in bytes {
            match self.stage {
                Stage::Code => {
                    if byte.is_ascii_digit() {
                        self.line_code = self.line_code * 10 + (byte - b'0') as u16;
                        self.digits += 1;
                        if self.digits == 3 {
                            self.stage = Stage::Separator;
                        }
                    } else {
                        self.reset();
                        return Err(ParseError::InvalidCode);
                    }
                }
                Stage::Separator => {
                    match byte {
                        b' ' => {
                            self.terminal = true;
                        }
                        b'-' => (),
                        _ => {
                            self.reset();
                            return Err(ParseError::InvalidSeparator);
                        }
                    }
                    match self.code {
                        Some(code) if code != self.line_code => {
                            self.reset();
                            return Err(ParseError::CodeMismatch);
                        }
                        _ => {
                            self.code = Some(self.line_code);
                        }
                    }
                    self.stage = Stage::Text;
                }
                Stage::Text => match byte {
                    b'\n' => {
                        self.lines
                            .push(String::from_utf8_lossy(&self.buf).into_owned());
                        self.buf.clear();
                        if self.terminal {
                            let response = Response {
                                code: self.code.unwrap_or(self.line_code),
                                lines: std::mem::take(&mut self.lines),
                            };
                            self.reset();
                            return Ok(response);
                        }
                        self.stage = Stage::Code;
                        self.line_code = 0;
                        self.digits = 0;
                    }
                    b'\r' => (),
                    _ => {
                        if self.total < MAX_RESPONSE_LENGTH {
                            self.buf.push(byte);
                            self.total += 1;
                        } else {
                            self.reset();
                            return Err(ParseError::TooLong);
                        }
                    }
                },
            }
        }

        Err(ParseError::NeedsMoreData)
    }
}

#[cfg(test)]
mod test {
    use super::{ParseError, Response, ResponseParser, Severity, MAX_RESPONSE_LENGTH};

    fn parse(parser: &mut ResponseParser, bytes: &[u8]) -> Result<Response, ParseError> {
        parser.parse(&mut bytes.iter())
    }

    #[test]
    fn multi_line_response() {
        let mut parser = ResponseParser::new();

        let response = parse(
            &mut parser,
            b"250-First line\r\n250-Second line\r\n250-234 Text beginning with numbers\r\n250 The last line\r\n",
        )
        .unwrap();
        assert_eq!(response.code(), 250);
        assert_eq!(response.severity(), Severity::PositiveCompletion);
        assert_eq!(
            response.lines(),
            &[
                "First line",
                "Second line",
                "234 Text beginning with numbers",
                "The last line"
            ]
        );
    }

    #[test]
    fn single_line_response() {
        let mut parser = ResponseParser::new();

        let response = parse(&mut parser, b"421 These pretzels are making me thirsty\r\n").unwrap();
        assert_eq!(response.code(), 421);
        assert_eq!(response.severity(), Severity::TransientNegativeCompletion);
        assert_eq!(response.lines(), &["These pretzels are making me thirsty"]);
    }

    #[test]
    fn chunked_response() {
        let mut parser = ResponseParser::new();

        assert_eq!(
            parse(&mut parser, b"555-These pretzels\r\n"),
            Err(ParseError::NeedsMoreData)
        );
        let response = parse(&mut parser, b"555 are making me thirsty\r\n").unwrap();
        assert_eq!(response.code(), 555);
        assert_eq!(response.severity(), Severity::PermanentNegativeCompletion);
        assert_eq!(response.lines(), &["These pretzels", "are making me thirsty"]);

        // Split in the middle of the reply code
        assert_eq!(parse(&mut parser, b"2"), Err(ParseError::NeedsMoreData));
        assert_eq!(parse(&mut parser, b"20 rea"), Err(ParseError::NeedsMoreData));
        let response = parse(&mut parser, b"dy\r\n").unwrap();
        assert_eq!(response.code(), 220);
        assert_eq!(response.lines(), &["ready"]);
    }

    #[test]
    fn several_responses_in_one_segment() {
        let mut parser = ResponseParser::new();
        let segment = b"250 ok\r\n550 no\r\n354 go ahead\r\n";
        let mut bytes = segment.iter();

        let mut codes = Vec::new();
        while let Ok(response) = parser.parse(&mut bytes) {
            codes.push(response.code());
        }
        assert_eq!(codes, vec![250, 550, 354]);
    }

    #[test]
    fn invalid_responses() {
        let mut parser = ResponseParser::new();

        assert_eq!(
            parse(&mut parser, b"421-These pretzels\r\n250 are making me thirsty\r\n"),
            Err(ParseError::CodeMismatch)
        );
        assert_eq!(
            parse(&mut parser, b"1zz-These pretzels are making me thirsty\r\n"),
            Err(ParseError::InvalidCode)
        );
        assert_eq!(
            parse(&mut parser, b"123These pretzels are making me thirsty\r\n"),
            Err(ParseError::InvalidSeparator)
        );

        let mut long_response = Vec::new();
        (0..MAX_RESPONSE_LENGTH + 1).for_each(|_| long_response.extend_from_slice(b"123-a\r\n"));
        long_response.extend_from_slice(b"123 a\r\n");
        assert_eq!(parse(&mut parser, &long_response), Err(ParseError::TooLong));
    }

    #[test]
    fn ehlo_round_trip() {
        // A crafted EHLO reply decodes to the exact code and line set
        let mut parser = ResponseParser::new();
        let response = parse(
            &mut parser,
            concat!(
                "250-mx.example.org at your service\r\n",
                "250-PIPELINING\r\n",
                "250-8BITMIME\r\n",
                "250 STARTTLS\r\n",
            )
            .as_bytes(),
        )
        .unwrap();
        assert_eq!(
            response,
            Response::new(
                250,
                vec![
                    "mx.example.org at your service".to_string(),
                    "PIPELINING".to_string(),
                    "8BITMIME".to_string(),
                    "STARTTLS".to_string(),
                ]
            )
        );
    }
}
