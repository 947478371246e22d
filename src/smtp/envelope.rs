/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

/// Message content offered in a 7-bit-safe form and, optionally, a distinct
/// 8-bit form. When no 8-bit form is provided the same bytes serve both
/// transports.
#[derive(Debug, Clone, Default)]
pub struct Message {
    body: Vec<u8>,
    eight_bit: Option<Vec<u8>>,
}

impl Message {
    /// Creates a message from its 7-bit transport form.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Message {
            body: body.into(),
            eight_bit: None,
        }
    }

    /// Sets a distinct body to transmit when the server negotiated 8BITMIME.
    pub fn eight_bit(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.eight_bit = Some(body.into());
        self
    }

    /// Returns `true` when this message benefits from 8-bit transport.
    pub(crate) fn wants_eight_bit(&self) -> bool {
        self.eight_bit.is_some() || self.body.iter().any(|&byte| byte >= 0x80)
    }

    /// Returns the body in the form selected for the negotiated transport.
    pub(crate) fn transfer_body(&self, eight_bit: bool) -> &[u8] {
        if eight_bit {
            self.eight_bit.as_deref().unwrap_or(&self.body)
        } else {
            &self.body
        }
    }
}

/// One delivery transaction: an optional sender, a non-empty ordered set of
/// recipients and the message content.
#[derive(Debug, Clone)]
pub struct Envelope {
    sender: Option<String>,
    recipients: Vec<String>,
    message: Message,
}

impl Envelope {
    /// Creates an envelope. Fails with [`crate::Error::NoRecipients`] when
    /// the recipient list is empty; duplicate recipients are dropped while
    /// preserving order.
    pub fn new<T, U>(sender: impl Into<String>, recipients: U, message: Message) -> crate::Result<Self>
    where
        T: Into<String>,
        U: IntoIterator<Item = T>,
    {
        Self::build(Some(sender.into()), recipients, message)
    }

    /// Creates an envelope with the null reverse-path `<>`, used for bounce
    /// and delivery status notification messages.
    pub fn null_sender<T, U>(recipients: U, message: Message) -> crate::Result<Self>
    where
        T: Into<String>,
        U: IntoIterator<Item = T>,
    {
        Self::build(None, recipients, message)
    }

    fn build<T, U>(sender: Option<String>, recipients: U, message: Message) -> crate::Result<Self>
    where
        T: Into<String>,
        U: IntoIterator<Item = T>,
    {
        let mut unique = Vec::new();
        for recipient in recipients {
            let recipient = recipient.into();
            if !unique.contains(&recipient) {
                unique.push(recipient);
            }
        }
        if unique.is_empty() {
            return Err(crate::Error::NoRecipients);
        }
        Ok(Envelope {
            sender,
            recipients: unique,
            message,
        })
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn message(&self) -> &Message {
        &self.message
    }
}

#[cfg(test)]
mod test {
    use super::{Envelope, Message};

    #[test]
    fn envelope_construction() {
        let envelope = Envelope::new(
            "jdoe@example.org",
            ["jane@example.com", "james@test.com", "jane@example.com"],
            Message::new("Subject: Hi!\r\n\r\nHello, world!\r\n"),
        )
        .unwrap();
        assert_eq!(envelope.sender(), Some("jdoe@example.org"));
        assert_eq!(envelope.recipients(), &["jane@example.com", "james@test.com"]);

        let envelope = Envelope::null_sender(["jane@example.com"], Message::default()).unwrap();
        assert_eq!(envelope.sender(), None);

        assert!(matches!(
            Envelope::new("jdoe@example.org", Vec::<String>::new(), Message::default()),
            Err(crate::Error::NoRecipients)
        ));
    }

    #[test]
    fn transfer_body_selection() {
        let message = Message::new("seven");
        assert!(!message.wants_eight_bit());
        assert_eq!(message.transfer_body(false), b"seven");
        assert_eq!(message.transfer_body(true), b"seven");

        let message = Message::new("quoted =C3=A9").eight_bit("raw \u{e9}".as_bytes());
        assert!(message.wants_eight_bit());
        assert_eq!(message.transfer_body(false), b"quoted =C3=A9");
        assert_eq!(message.transfer_body(true), "raw \u{e9}".as_bytes());

        // A body that already contains 8-bit octets wants 8-bit transport
        let message = Message::new("caf\u{e9}".as_bytes());
        assert!(message.wants_eight_bit());
    }
}
