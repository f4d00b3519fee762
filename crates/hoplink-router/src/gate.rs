//! Validation gate: decides whether an engine event is the router's to forward.

use hoplink_core::{
    CoreError, RouterIdentity, RouterMeta, RouterMetaValidator, TransferEventPayload,
    TransferResolver,
};

use crate::error::Ineligible;

/// Pure eligibility checks for transfer events.
///
/// `check_*` return the parsed routing meta on success so the forwarder can
/// reuse it; `is_forwardable_*` are the logging predicates the listener
/// applies as a pre-filter.
#[derive(Debug)]
pub struct ValidationGate {
    identity: RouterIdentity,
    validator: RouterMetaValidator,
}

impl ValidationGate {
    pub fn new(identity: RouterIdentity) -> Result<Self, CoreError> {
        Ok(Self {
            identity,
            validator: RouterMetaValidator::new()?,
        })
    }

    pub fn identity(&self) -> &RouterIdentity {
        &self.identity
    }

    fn check_meta(&self, payload: &TransferEventPayload) -> Result<RouterMeta, Ineligible> {
        let validation = self.validator.validate_routing_meta(&payload.transfer.meta);
        if !validation.valid {
            return Err(Ineligible::InvalidMeta(validation.errors));
        }
        payload
            .transfer
            .routing_meta()
            .map_err(|e| Ineligible::InvalidMeta(vec![e.to_string()]))
    }

    /// Eligibility of a "transfer created" event.
    pub fn check_creation(&self, payload: &TransferEventPayload) -> Result<RouterMeta, Ineligible> {
        let meta = self.check_meta(payload)?;

        if payload.transfer.initiator == self.identity.signer_address {
            return Err(Ineligible::SelfInitiated);
        }

        let recipient = meta
            .next_hop()
            .and_then(|hop| hop.recipient.as_deref())
            .ok_or(Ineligible::NoPath)?;
        if recipient.is_empty() {
            return Err(Ineligible::NoPath);
        }
        if recipient == self.identity.public_identifier {
            return Err(Ineligible::FinalRecipient);
        }

        Ok(meta)
    }

    /// Eligibility of a "transfer resolved" event.
    pub fn check_resolution(
        &self,
        payload: &TransferEventPayload,
    ) -> Result<(RouterMeta, TransferResolver), Ineligible> {
        let meta = self.check_meta(payload)?;

        let resolver = payload
            .transfer
            .resolver
            .clone()
            .ok_or(Ineligible::NoResolver)?;

        if payload.transfer.responder == self.identity.signer_address {
            return Err(Ineligible::SelfResponder);
        }

        Ok((meta, resolver))
    }

    pub fn is_forwardable_creation(&self, payload: &TransferEventPayload) -> bool {
        match self.check_creation(payload) {
            Ok(_) => true,
            Err(reason) => {
                log_rejection(payload, &reason);
                false
            }
        }
    }

    pub fn is_forwardable_resolution(&self, payload: &TransferEventPayload) -> bool {
        match self.check_resolution(payload) {
            Ok(_) => true,
            Err(reason) => {
                log_rejection(payload, &reason);
                false
            }
        }
    }
}

fn log_rejection(payload: &TransferEventPayload, reason: &Ineligible) {
    let transfer = &payload.transfer;
    let routing_id = transfer.routing_id().unwrap_or_default();
    match reason {
        Ineligible::InvalidMeta(errors) => tracing::info!(
            transfer_id = %transfer.transfer_id,
            channel_address = %payload.channel_address,
            ?errors,
            "not forwarding non-routing transfer"
        ),
        Ineligible::SelfInitiated => tracing::info!(
            initiator = %transfer.initiator,
            routing_id,
            "not forwarding transfer initiated by this router"
        ),
        Ineligible::NoPath | Ineligible::FinalRecipient => tracing::warn!(
            transfer_id = %transfer.transfer_id,
            routing_id,
            %reason,
            "not forwarding transfer with no path to follow"
        ),
        Ineligible::NoResolver => tracing::warn!(
            transfer_id = %transfer.transfer_id,
            routing_id,
            channel_address = %transfer.channel_address,
            "no resolver found in transfer"
        ),
        Ineligible::SelfResponder => tracing::info!(routing_id, "nothing to reclaim"),
    }
}
