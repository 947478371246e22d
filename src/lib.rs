/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! # mail-deliver
//!
//! _mail-deliver_ is a Rust library that delivers e-mail envelopes over SMTP
//! (_RFC 5321_) and reports a per-recipient outcome for every envelope. It
//! includes the following features:
//!
//! - Multiple envelopes per connection, each yielding its own
//!   [`DeliveryResult`] with one [`RecipientStatus`] per recipient.
//! - SMTP command pipelining (_RFC 2920_) with strict in-order response
//!   correlation, opportunistic or mandatory per connection.
//! - Secure SMTP over **TLS** via `STARTTLS` (_RFC 3207_), opportunistic or
//!   mandatory, with capability re-negotiation after the handshake.
//! - SMTP authentication (_RFC 4954_) using the `PLAIN` and `LOGIN`
//!   mechanisms.
//! - 8-bit message transport when the server advertises `8BITMIME`.
//! - Full async (requires Tokio).
//!
//! ## Usage Example
//!
//! ```rust
//!     // Describe one delivery transaction
//!     let envelope = Envelope::new(
//!         "jdoe@example.org",
//!         ["jane@example.com", "james@test.com"],
//!         Message::new("Subject: Hi!\r\n\r\nHello, world!\r\n"),
//!     )
//!     .unwrap();
//!
//!     // Deliver it, authenticating with the provided credentials
//!     let results = SessionBuilder::new("mail.example.org", 587)
//!         .credentials(Credentials::plain("jdoe", "p4ssw0rd"))
//!         .deliver(vec![envelope])
//!         .await;
//!
//!     for status in results[0].statuses().unwrap() {
//!         println!("{}: {:?}", status.address(), status.status());
//!     }
//! ```
//!
//! Delivery can also be driven without spawning, on an explicitly opened
//! session:
//!
//! ```rust
//!     let session = SessionBuilder::new("mail.example.org", 25)
//!         .helo_host("client.example.org")
//!         .pipelining(ExtensionMode::Depend)
//!         .connect()
//!         .await
//!         .unwrap();
//!     let results = session.deliver(envelopes).await;
//! ```

pub mod proto;
pub mod smtp;
#[forbid(unsafe_code)]
pub mod transport;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error, including refused connections.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS handshake or protocol error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Failure parsing an SMTP response.
    #[error("Unparseable SMTP response: {0}")]
    UnparseableReply(#[from] proto::response::ParseError),

    /// Invalid TLS name provided.
    #[error("Invalid TLS name provided")]
    InvalidTlsName,

    /// A required extension was not advertised by the server.
    #[error("Server does not advertise the {0} extension")]
    UnsupportedExtension(&'static str),

    /// The envelope carries no recipients.
    #[error("Envelope has no recipients")]
    NoRecipients,

    /// Connection timeout.
    #[error("Connection timeout")]
    Timeout,

    /// No bytes were exchanged within the configured idle window.
    #[error("Idle timeout while waiting for the server")]
    Idle,

    /// The server closed the connection mid-transaction.
    #[error("Connection closed by the remote server")]
    Disconnected,

    /// The delivery future was cancelled.
    #[error("Delivery cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

pub use proto::{
    extension::Extensions,
    request::{PipelinedRequest, Request},
    response::{Response, Severity},
};
pub use smtp::{
    auth::{Credentials, Mechanism},
    builder::{ExtensionMode, SessionBuilder},
    envelope::{Envelope, Message},
    future::DeliveryFuture,
    result::{DeliveryResult, DeliveryStatus, RecipientStatus},
    session::Session,
};
