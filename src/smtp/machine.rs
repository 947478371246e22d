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
use std::sync::Arc;

use crate::proto::extension::Extensions;
use crate::proto::request::{PipelinedRequest, Request};
use crate::proto::response::Response;
use crate::smtp::auth::{self, Credentials, Mechanism};
use crate::smtp::builder::ExtensionMode;
use crate::smtp::envelope::Envelope;
use crate::smtp::result::{DeliveryResult, RecipientStatus};
use crate::Error;

/// The protocol step whose server response is awaited next. Every state
/// consumes exactly one response, except `Welcome` which consumes the
/// connection greeting before any request has been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum State {
    Welcome,
    Ehlo,
    Helo,
    StartTls,
    Auth(AuthPhase),
    Mail,
    Rcpt,
    Data,
    Body,
    /// Consuming responses to pipelined requests that were already on the
    /// wire when the transaction finalized early.
    Draining { remaining: usize, aborted: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuthPhase {
    Initial,
    UsernameSent,
    SecretSent,
}

/// One step's output, executed by the session driver in order.
#[derive(Debug)]
pub(crate) enum Action {
    Send(Request),
    SendBatch(PipelinedRequest),
    SendBody { eight_bit: bool },
    /// Terminate an accepted DATA with a lone dot; the transaction already
    /// finalized so the ensuing response is discarded.
    AbortData,
    UpgradeTls,
    Finish(DeliveryResult),
    Quit,
}

/// Typed per-envelope context: the envelope being delivered, the statuses
/// accumulated in strict recipient order, and the transport form chosen for
/// the body.
#[derive(Debug)]
struct Transaction {
    envelope: Envelope,
    statuses: Vec<RecipientStatus>,
    eight_bit: bool,
}

/// The transaction state machine. It consumes server responses one at a
/// time, in arrival order, and emits the requests, body transmissions and
/// per-envelope results that follow from them. It performs no I/O of its
/// own.
#[derive(Debug)]
pub(crate) struct Machine {
    helo_host: String,
    pipelining_mode: ExtensionMode,
    starttls_mode: ExtensionMode,
    credentials: Option<Credentials>,
    extensions: Extensions,
    state: State,
    secure: bool,
    pipelining: bool,
    envelopes: VecDeque<Envelope>,
    txn: Option<Transaction>,
}

impl Machine {
    pub(crate) fn new(
        helo_host: String,
        pipelining_mode: ExtensionMode,
        starttls_mode: ExtensionMode,
        credentials: Option<Credentials>,
        envelopes: Vec<Envelope>,
    ) -> Self {
        Machine {
            helo_host,
            pipelining_mode,
            starttls_mode,
            credentials,
            extensions: Extensions::default(),
            state: State::Welcome,
            secure: false,
            pipelining: false,
            envelopes: envelopes.into(),
            txn: None,
        }
    }

    /// Dispatches one server response to the handler for the current state.
    pub(crate) fn on_response(&mut self, response: Response) -> Vec<Action> {
        match self.state {
            State::Welcome => self.on_welcome(response),
            State::Ehlo => self.on_ehlo(response),
            State::Helo => self.on_helo(response),
            State::StartTls => self.on_starttls(response),
            State::Auth(phase) => self.on_auth(phase, response),
            State::Mail => self.on_mail(response),
            State::Rcpt => self.on_rcpt(response),
            State::Data => self.on_data(response),
            State::Body => self.on_body(response),
            State::Draining { .. } => self.on_draining(response),
        }
    }

    /// Called by the driver once the TLS handshake has completed. The
    /// pre-TLS extension set is discarded and renegotiated (RFC 3207).
    pub(crate) fn on_tls_upgraded(&mut self) -> Vec<Action> {
        self.secure = true;
        self.extensions = Extensions::default();
        self.state = State::Ehlo;
        vec![Action::Send(Request::ehlo(self.helo_host.clone()))]
    }

    /// Converts a fatal transport error into one `Failed` result for the
    /// in-flight envelope and every envelope still queued.
    pub(crate) fn abort(&mut self, err: Error) -> Vec<DeliveryResult> {
        let err = Arc::new(err);
        let mut results = Vec::new();
        if self.txn.take().is_some() {
            results.push(DeliveryResult::Failed(err.clone()));
        }
        results.extend(
            std::mem::take(&mut self.envelopes)
                .into_iter()
                .map(|_| DeliveryResult::Failed(err.clone())),
        );
        results
    }

    /// Returns the body of the in-flight envelope in its selected form.
    pub(crate) fn message_body(&self, eight_bit: bool) -> &[u8] {
        self.txn
            .as_ref()
            .map_or(b"".as_slice(), |txn| txn.envelope.message().transfer_body(eight_bit))
    }

    fn on_welcome(&mut self, response: Response) -> Vec<Action> {
        if response.code() < 400 {
            self.state = State::Ehlo;
            vec![Action::Send(Request::ehlo(self.helo_host.clone()))]
        } else {
            self.reject_all(response)
        }
    }

    fn on_ehlo(&mut self, response: Response) -> Vec<Action> {
        if response.is_positive_completion() {
            self.extensions = Extensions::parse(&response);
            self.after_greeting()
        } else {
            // ESMTP is not spoken here, fall back to the simpler greeting
            self.state = State::Helo;
            vec![Action::Send(Request::helo(self.helo_host.clone()))]
        }
    }

    fn on_helo(&mut self, response: Response) -> Vec<Action> {
        if response.is_positive_completion() {
            self.extensions = Extensions::default();
            self.after_greeting()
        } else {
            self.reject_all(response)
        }
    }

    fn after_greeting(&mut self) -> Vec<Action> {
        if self.pipelining_mode == ExtensionMode::Depend && !self.extensions.pipelining() {
            return self.fail_all(Error::UnsupportedExtension("PIPELINING"));
        }
        if !self.secure
            && self.starttls_mode == ExtensionMode::Depend
            && !self.extensions.starttls()
        {
            return self.fail_all(Error::UnsupportedExtension("STARTTLS"));
        }
        if !self.secure && self.starttls_mode != ExtensionMode::No && self.extensions.starttls() {
            self.state = State::StartTls;
            return vec![Action::Send(Request::STARTTLS)];
        }

        self.pipelining = self.extensions.pipelining() && self.pipelining_mode != ExtensionMode::No;

        if let Some(credentials) = self.credentials.clone() {
            self.state = State::Auth(AuthPhase::Initial);
            return match credentials.mechanism() {
                Mechanism::Plain => {
                    vec![Action::Send(Request::auth_plain(credentials.plain_payload()))]
                }
                Mechanism::Login => vec![Action::Send(Request::AUTH_LOGIN)],
            };
        }

        self.begin_mail()
    }

    fn on_starttls(&mut self, response: Response) -> Vec<Action> {
        if response.code() < 400 {
            vec![Action::UpgradeTls]
        } else {
            self.reject_all(response)
        }
    }

    fn on_auth(&mut self, phase: AuthPhase, response: Response) -> Vec<Action> {
        let Some(credentials) = self.credentials.clone() else {
            return self.reject_all(response);
        };
        match (phase, response.code()) {
            // 235 is the only code that completes an AUTH exchange
            (_, 235) => self.begin_mail(),
            (AuthPhase::Initial, 334) if credentials.mechanism() == Mechanism::Login => {
                self.state = State::Auth(AuthPhase::UsernameSent);
                vec![Action::Send(Request::payload(credentials.username_payload()))]
            }
            (AuthPhase::UsernameSent, 334) => {
                self.state = State::Auth(AuthPhase::SecretSent);
                vec![Action::Send(Request::payload(credentials.secret_payload()))]
            }
            _ => {
                let response = if credentials.mechanism() == Mechanism::Login {
                    auth::decode_challenge(&response)
                } else {
                    response
                };
                self.reject_all(response)
            }
        }
    }

    fn begin_mail(&mut self) -> Vec<Action> {
        let Some(envelope) = self.envelopes.pop_front() else {
            return vec![Action::Quit];
        };

        let eight_bit = self.extensions.eight_bit_mime() && envelope.message().wants_eight_bit();
        let mail = Request::mail(envelope.sender(), eight_bit);
        self.state = State::Mail;

        let actions = if self.pipelining {
            let mut batch = PipelinedRequest::new();
            batch.push(mail);
            for recipient in envelope.recipients() {
                batch.push(Request::rcpt(recipient));
            }
            batch.push(Request::DATA);
            vec![Action::SendBatch(batch)]
        } else {
            vec![Action::Send(mail)]
        };

        self.txn = Some(Transaction {
            envelope,
            statuses: Vec::new(),
            eight_bit,
        });
        actions
    }

    fn on_mail(&mut self, response: Response) -> Vec<Action> {
        if response.code() > 400 {
            // Sender rejection is global, every recipient inherits it
            let pending = if let Some(txn) = self.txn.as_mut() {
                for recipient in txn.envelope.recipients().to_vec() {
                    txn.statuses.push(RecipientStatus::new(recipient, response.clone()));
                }
                txn.envelope.recipients().len() + 1
            } else {
                0
            };
            self.finalize(if self.pipelining { pending } else { 0 })
        } else {
            self.state = State::Rcpt;
            if self.pipelining {
                Vec::new()
            } else if let Some(txn) = self.txn.as_ref() {
                vec![Action::Send(Request::rcpt(&txn.envelope.recipients()[0]))]
            } else {
                vec![Action::Quit]
            }
        }
    }

    fn on_rcpt(&mut self, response: Response) -> Vec<Action> {
        let Some(txn) = self.txn.as_mut() else {
            return vec![Action::Quit];
        };

        // Responses arrive in strict request order; the status vector length
        // doubles as the cursor of the recipient being answered
        let index = txn.statuses.len();
        txn.statuses
            .push(RecipientStatus::new(txn.envelope.recipients()[index].clone(), response));

        if txn.statuses.len() < txn.envelope.recipients().len() {
            let next = txn.envelope.recipients()[txn.statuses.len()].clone();
            if self.pipelining {
                Vec::new()
            } else {
                vec![Action::Send(Request::rcpt(&next))]
            }
        } else if txn.statuses.iter().any(|status| status.status().is_ok()) {
            self.state = State::Data;
            if self.pipelining {
                Vec::new()
            } else {
                vec![Action::Send(Request::DATA)]
            }
        } else {
            // Nobody left to deliver to, the message is never transmitted
            self.finalize(if self.pipelining { 1 } else { 0 })
        }
    }

    fn on_data(&mut self, response: Response) -> Vec<Action> {
        if response.code() < 400 {
            self.state = State::Body;
            let eight_bit = self.txn.as_ref().map_or(false, |txn| txn.eight_bit);
            vec![Action::SendBody { eight_bit }]
        } else {
            // DATA rejection cancels prior RCPT acceptances
            self.overwrite_accepted(&response);
            self.finalize(0)
        }
    }

    fn on_body(&mut self, response: Response) -> Vec<Action> {
        // The body response is the final delivery outcome for every
        // recipient that was still in good standing
        self.overwrite_accepted(&response);
        self.finalize(0)
    }

    fn on_draining(&mut self, response: Response) -> Vec<Action> {
        let State::Draining { remaining, aborted } = self.state else {
            return vec![Action::Quit];
        };
        let remaining = remaining - 1;
        if remaining == 0 {
            // The trailing response belongs to the pipelined DATA; an
            // accepted DATA must still be terminated (RFC 2920 section 3.1)
            if response.is_positive_intermediate() && !aborted {
                self.state = State::Draining {
                    remaining: 1,
                    aborted: true,
                };
                return vec![Action::AbortData];
            }
            return self.next_envelope();
        }
        self.state = State::Draining { remaining, aborted };
        Vec::new()
    }

    fn overwrite_accepted(&mut self, response: &Response) {
        if let Some(txn) = self.txn.as_mut() {
            for status in txn.statuses.iter_mut() {
                if status.status().is_ok() {
                    *status = RecipientStatus::new(status.address().to_string(), response.clone());
                }
            }
        }
    }

    /// Emits the result for the in-flight envelope. When pipelined responses
    /// are still due, the machine drains them before moving on.
    fn finalize(&mut self, drain: usize) -> Vec<Action> {
        let Some(txn) = self.txn.take() else {
            return vec![Action::Quit];
        };
        let mut actions = vec![Action::Finish(DeliveryResult::Delivered(txn.statuses))];
        if drain > 0 {
            self.state = State::Draining {
                remaining: drain,
                aborted: false,
            };
        } else {
            actions.extend(self.next_envelope());
        }
        actions
    }

    fn next_envelope(&mut self) -> Vec<Action> {
        if self.envelopes.is_empty() {
            vec![Action::Quit]
        } else {
            self.begin_mail()
        }
    }

    /// Finalizes every envelope with the given response: each recipient
    /// inherits it as its status. Used when the greeting, STARTTLS or AUTH
    /// step is rejected and the connection is of no further use.
    fn reject_all(&mut self, response: Response) -> Vec<Action> {
        let mut actions = Vec::new();
        while let Some(envelope) = self.envelopes.pop_front() {
            let statuses = envelope
                .recipients()
                .iter()
                .map(|recipient| RecipientStatus::new(recipient.clone(), response.clone()))
                .collect();
            actions.push(Action::Finish(DeliveryResult::Delivered(statuses)));
        }
        actions.push(Action::Quit);
        actions
    }

    /// Fails every envelope with the given error before any transaction has
    /// started, still quitting the session cleanly.
    fn fail_all(&mut self, err: Error) -> Vec<Action> {
        let err = Arc::new(err);
        let mut actions: Vec<Action> = std::mem::take(&mut self.envelopes)
            .into_iter()
            .map(|_| Action::Finish(DeliveryResult::Failed(err.clone())))
            .collect();
        actions.push(Action::Quit);
        actions
    }
}
