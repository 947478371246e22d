/*
 * Copyright Stalwart Labs Ltd.
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::sync::Arc;

use crate::proto::response::Response;
use crate::Error;

/// Outcome class of a recipient, derived from the reply code that decided
/// its fate: 2xx accepted, 5xx permanently rejected, anything else transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Ok,
    PermanentError,
    TemporaryError,
}

impl DeliveryStatus {
    pub(crate) fn from_code(code: u16) -> Self {
        match code / 100 {
            2 => DeliveryStatus::Ok,
            5 => DeliveryStatus::PermanentError,
            _ => DeliveryStatus::TemporaryError,
        }
    }

    pub fn is_ok(self) -> bool {
        self == DeliveryStatus::Ok
    }
}

/// The fate of a single recipient, paired with the server response that
/// decided it. For accepted recipients the response is the final post-DATA
/// reply; rejected recipients keep the reply that refused them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientStatus {
    address: String,
    status: DeliveryStatus,
    response: Response,
}

impl RecipientStatus {
    pub(crate) fn new(address: String, response: Response) -> Self {
        RecipientStatus {
            address,
            status: DeliveryStatus::from_code(response.code()),
            response,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn status(&self) -> DeliveryStatus {
        self.status
    }

    pub fn response(&self) -> &Response {
        &self.response
    }
}

/// The outcome of one envelope. A transaction that ran to completion is
/// `Delivered`, even when some or all recipients were rejected; `Failed`
/// carries the transport or negotiation error that prevented the transaction
/// from completing.
#[derive(Debug, Clone)]
pub enum DeliveryResult {
    Delivered(Vec<RecipientStatus>),
    Failed(Arc<Error>),
}

impl DeliveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryResult::Delivered(_))
    }

    pub fn statuses(&self) -> Option<&[RecipientStatus]> {
        match self {
            DeliveryResult::Delivered(statuses) => Some(statuses),
            DeliveryResult::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            DeliveryResult::Delivered(_) => None,
            DeliveryResult::Failed(err) => Some(err),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{DeliveryStatus, RecipientStatus};
    use crate::proto::response::Response;

    #[test]
    fn status_from_code() {
        for (code, status) in [
            (200, DeliveryStatus::Ok),
            (250, DeliveryStatus::Ok),
            (299, DeliveryStatus::Ok),
            (354, DeliveryStatus::TemporaryError),
            (421, DeliveryStatus::TemporaryError),
            (452, DeliveryStatus::TemporaryError),
            (500, DeliveryStatus::PermanentError),
            (554, DeliveryStatus::PermanentError),
            (599, DeliveryStatus::PermanentError),
        ] {
            let recipient = RecipientStatus::new(
                "jane@example.com".to_string(),
                Response::new(code, vec!["details".to_string()]),
            );
            assert_eq!(recipient.status(), status, "code {}", code);
            assert_eq!(recipient.response().code(), code);
        }
    }
}
