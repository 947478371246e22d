/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::collections::VecDeque;
use std::time::Duration;

use tokio_rustls::TlsConnector;

use crate::proto::request::{PipelinedRequest, Request};
use crate::proto::response::{ParseError, Response, ResponseParser};
use crate::smtp::auth::Credentials;
use crate::smtp::builder::ExtensionMode;
use crate::smtp::envelope::Envelope;
use crate::smtp::machine::{Action, Machine};
use crate::smtp::result::DeliveryResult;
use crate::transport::stream::SmtpStream;
use crate::Error;

/// One logical connection to an SMTP server. A session delivers a batch of
/// envelopes sequentially on the same connection and is consumed by doing
/// so; the server greeting is read as the first step of the delivery.
pub struct Session {
    stream: SmtpStream,
    remote: String,
    timeout: Duration,
    tls_connector: TlsConnector,
    helo_host: String,
    pipelining: ExtensionMode,
    starttls: ExtensionMode,
    credentials: Option<Credentials>,
    parser: ResponseParser,
    pending: VecDeque<Response>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        stream: SmtpStream,
        remote: String,
        timeout: Duration,
        tls_connector: TlsConnector,
        helo_host: String,
        pipelining: ExtensionMode,
        starttls: ExtensionMode,
        credentials: Option<Credentials>,
    ) -> Self {
        Session {
            stream,
            remote,
            timeout,
            tls_connector,
            helo_host,
            pipelining,
            starttls,
            credentials,
            parser: ResponseParser::new(),
            pending: VecDeque::new(),
        }
    }

    /// Drives the delivery of the given envelopes and returns one result per
    /// envelope, in order. Transport failures are folded into the results;
    /// this method does not fail as a whole.
    pub async fn deliver(mut self, envelopes: Vec<Envelope>) -> Vec<DeliveryResult> {
        if envelopes.is_empty() {
            return Vec::new();
        }

        let mut machine = Machine::new(
            self.helo_host.clone(),
            self.pipelining,
            self.starttls,
            self.credentials.clone(),
            envelopes,
        );
        let mut results = Vec::new();
        let mut actions: VecDeque<Action> = VecDeque::new();

        loop {
            if actions.is_empty() {
                match self.read().await {
                    Ok(response) => actions.extend(machine.on_response(response)),
                    Err(err) => {
                        tracing::debug!(host = %self.remote, error = %err, "transport failure");
                        results.extend(machine.abort(err));
                        self.hangup().await;
                        return results;
                    }
                }
            }

            while let Some(action) = actions.pop_front() {
                let outcome = match action {
                    Action::Send(request) => self.send(&request).await,
                    Action::SendBatch(batch) => self.send_batch(&batch).await,
                    Action::SendBody { eight_bit } => {
                        self.send_message(machine.message_body(eight_bit)).await
                    }
                    Action::AbortData => self.write(b".\r\n").await,
                    Action::UpgradeTls => match self.upgrade_tls().await {
                        Ok(()) => {
                            actions.extend(machine.on_tls_upgraded());
                            Ok(())
                        }
                        Err(err) => Err(err),
                    },
                    Action::Finish(result) => {
                        results.push(result);
                        Ok(())
                    }
                    Action::Quit => {
                        self.quit().await;
                        return results;
                    }
                };

                if let Err(err) = outcome {
                    tracing::debug!(host = %self.remote, error = %err, "transport failure");
                    results.extend(machine.abort(err));
                    self.hangup().await;
                    return results;
                }
            }
        }
    }

    /// Sends a single request and waits for its response.
    pub async fn cmd(&mut self, request: &Request) -> crate::Result<Response> {
        self.send(request).await?;
        self.read().await
    }

    /// Sends a NOOP command to the server.
    pub async fn noop(&mut self) -> crate::Result<Response> {
        self.cmd(&Request::NOOP).await
    }

    /// Returns the next response, in arrival order. Several responses in a
    /// single segment are split and queued so that pipelined batches
    /// correlate one response to one request.
    async fn read(&mut self) -> crate::Result<Response> {
        if let Some(response) = self.pending.pop_front() {
            return Ok(response);
        }

        let mut buf = vec![0u8; 1024];
        loop {
            let br = tokio::time::timeout(self.timeout, self.stream.read(&mut buf))
                .await
                .map_err(|_| Error::Idle)??;
            if br == 0 {
                return Err(Error::Disconnected);
            }

            let mut bytes = buf[..br].iter();
            loop {
                match self.parser.parse(&mut bytes) {
                    Ok(response) => {
                        tracing::trace!(host = %self.remote, code = response.code(), "recv");
                        self.pending.push_back(response);
                    }
                    Err(ParseError::NeedsMoreData) => break,
                    Err(err) => return Err(err.into()),
                }
            }

            if let Some(response) = self.pending.pop_front() {
                return Ok(response);
            }
        }
    }

    async fn send(&mut self, request: &Request) -> crate::Result<()> {
        tracing::trace!(host = %self.remote, "send {}", request);
        self.write(request.to_wire().as_bytes()).await
    }

    async fn send_batch(&mut self, batch: &PipelinedRequest) -> crate::Result<()> {
        for request in batch.iter() {
            tracing::trace!(host = %self.remote, "send {}", request);
        }
        self.write(batch.to_wire().as_bytes()).await
    }

    async fn send_message(&mut self, body: &[u8]) -> crate::Result<()> {
        tracing::trace!(host = %self.remote, bytes = body.len(), "send message body");
        tokio::time::timeout(self.timeout, self.stream.write_message(body))
            .await
            .map_err(|_| Error::Idle)?
            .map_err(Error::Io)
    }

    async fn write(&mut self, bytes: &[u8]) -> crate::Result<()> {
        tokio::time::timeout(self.timeout, async {
            self.stream.write_all(bytes).await?;
            self.stream.flush().await
        })
        .await
        .map_err(|_| Error::Idle)?
        .map_err(Error::Io)
    }

    async fn upgrade_tls(&mut self) -> crate::Result<()> {
        tracing::debug!(host = %self.remote, "upgrading connection via STARTTLS");
        let stream = std::mem::take(&mut self.stream);
        self.stream = tokio::time::timeout(
            self.timeout,
            stream.into_tls(&self.tls_connector, &self.remote),
        )
        .await
        .map_err(|_| Error::Timeout)??;
        Ok(())
    }

    /// Best-effort QUIT; the outcome is ignored and the connection is
    /// closed either way.
    async fn quit(&mut self) {
        if self.send(&Request::QUIT).await.is_ok() {
            let _ = self.read().await;
        }
        self.hangup().await;
    }

    async fn hangup(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}
