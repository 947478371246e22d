/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::TlsConnector;

use crate::smtp::auth::Credentials;
use crate::smtp::envelope::Envelope;
use crate::smtp::future::DeliveryFuture;
use crate::smtp::result::DeliveryResult;
use crate::smtp::session::Session;
use crate::transport::stream::SmtpStream;
use crate::transport::tls::build_tls_connector;
use crate::Error;

/// How hard to lean on an optional server extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtensionMode {
    /// Never use the extension, even when advertised.
    No,

    /// Use the extension when the server advertises it.
    #[default]
    Try,

    /// Require the extension; delivery fails before MAIL when the server
    /// does not advertise it.
    Depend,
}

/// Builds SMTP sessions towards one remote server.
pub struct SessionBuilder {
    hostname: String,
    port: u16,
    helo_host: String,
    connect_timeout: Duration,
    timeout: Duration,
    local_addr: Option<SocketAddr>,
    pipelining: ExtensionMode,
    starttls: ExtensionMode,
    credentials: Option<Credentials>,
    tls_connector: TlsConnector,
}

impl SessionBuilder {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        SessionBuilder {
            hostname: hostname.into(),
            port,
            helo_host: gethostname::gethostname()
                .to_str()
                .unwrap_or("[127.0.0.1]")
                .to_string(),
            connect_timeout: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
            local_addr: None,
            pipelining: ExtensionMode::default(),
            starttls: ExtensionMode::default(),
            credentials: None,
            tls_connector: build_tls_connector(false),
        }
    }

    /// Sets the EHLO/HELO hostname.
    pub fn helo_host(mut self, host: impl Into<String>) -> Self {
        self.helo_host = host.into();
        self
    }

    /// Bounds the TCP connection establishment.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bounds every wait for a server response; the connection is torn down
    /// when nothing is exchanged within this window.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Binds the outgoing socket to a local address.
    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Sets the pipelining mode.
    pub fn pipelining(mut self, mode: ExtensionMode) -> Self {
        self.pipelining = mode;
        self
    }

    /// Sets the STARTTLS mode.
    pub fn starttls(mut self, mode: ExtensionMode) -> Self {
        self.starttls = mode;
        self
    }

    /// Authentication credentials.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Allow invalid TLS certificates.
    pub fn allow_invalid_certs(mut self) -> Self {
        self.tls_connector = build_tls_connector(true);
        self
    }

    /// Opens the TCP connection and returns a session ready to deliver. The
    /// server greeting is consumed by the first delivery.
    pub async fn connect(&self) -> crate::Result<Session> {
        let stream = tokio::time::timeout(self.connect_timeout, self.open())
            .await
            .map_err(|_| Error::Timeout)??;
        tracing::debug!(host = %self.hostname, port = self.port, "connected");

        Ok(Session::new(
            SmtpStream::Tcp(stream),
            self.hostname.clone(),
            self.timeout,
            self.tls_connector.clone(),
            self.helo_host.clone(),
            self.pipelining,
            self.starttls,
            self.credentials.clone(),
        ))
    }

    async fn open(&self) -> crate::Result<TcpStream> {
        match self.local_addr {
            None => Ok(TcpStream::connect((self.hostname.as_str(), self.port)).await?),
            Some(local) => {
                let mut last_err = None;
                for addr in
                    tokio::net::lookup_host((self.hostname.as_str(), self.port)).await?
                {
                    let socket = if addr.is_ipv4() {
                        TcpSocket::new_v4()
                    } else {
                        TcpSocket::new_v6()
                    }?;
                    socket.bind(local)?;
                    match socket.connect(addr).await {
                        Ok(stream) => return Ok(stream),
                        Err(err) => {
                            last_err = Some(err);
                        }
                    }
                }
                Err(last_err
                    .unwrap_or_else(|| {
                        std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved")
                    })
                    .into())
            }
        }
    }

    /// Connects and delivers the given envelopes on a spawned task,
    /// returning a future handle that yields exactly one result per
    /// envelope. A connection failure fails every envelope with its cause.
    pub fn deliver(self, envelopes: Vec<Envelope>) -> DeliveryFuture {
        let future = DeliveryFuture::new(envelopes.len());
        let state = future.shared();
        tokio::spawn(async move {
            let results = tokio::select! {
                // Cancellation already resolved the future; dropping the
                // task closes the connection
                _ = state.cancelled() => return,
                results = self.run(envelopes) => results,
            };
            state.complete(results);
        });
        future
    }

    async fn run(self, envelopes: Vec<Envelope>) -> Vec<DeliveryResult> {
        match self.connect().await {
            Ok(session) => session.deliver(envelopes).await,
            Err(err) => {
                let err = Arc::new(err);
                envelopes
                    .iter()
                    .map(|_| DeliveryResult::Failed(err.clone()))
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::SessionBuilder;
    use crate::smtp::envelope::{Envelope, Message};
    use crate::Error;

    #[tokio::test]
    async fn connection_refused_fails_every_envelope() {
        // Reserve a port, then close the listener so nothing answers
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let envelopes = vec![
            Envelope::new("a@example.org", ["x@example.com"], Message::default()).unwrap(),
            Envelope::new("a@example.org", ["y@example.com"], Message::default()).unwrap(),
        ];
        let results = SessionBuilder::new("127.0.0.1", port)
            .deliver(envelopes)
            .await;

        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(!result.is_success());
            assert!(result.statuses().is_none());
            assert!(matches!(result.error(), Some(Error::Io(_))));
        }
    }
}
