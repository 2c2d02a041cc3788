//! Payment-selection setup at checkout time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use plaza_core::{AggregateId, BuyerId};
use plaza_events::{EventBus, EventEnvelope};
use plaza_payments::{
    CreateSelection, PaymentMethod, PaymentSelection, RecordFailed, SelectionCommand, SelectionId,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::settlement::registry::{Registration, SelectionRegistry};
use crate::settlement::AGG_SELECTION;

/// Creates payment selections when a buyer picks a payment method.
///
/// The provider reference arrives from the gateway at this point; the
/// registry pins its uniqueness, and a buyer choosing a new method while an
/// earlier selection is still pending supersedes the old one.
pub struct CheckoutService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    registry: Arc<SelectionRegistry>,
}

impl<S, B> CheckoutService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, registry: Arc<SelectionRegistry>) -> Self {
        Self { dispatcher, registry }
    }

    pub fn create_selection(
        &self,
        buyer_id: BuyerId,
        method: PaymentMethod,
        provider_reference: &str,
        now: DateTime<Utc>,
    ) -> Result<SelectionId, DispatchError> {
        let minted = SelectionId::new(AggregateId::new());

        match self.registry.register(buyer_id, provider_reference, minted)? {
            Registration::Existing { selection_id } => {
                // Same reference re-submitted: nothing new to create.
                Ok(selection_id)
            }
            Registration::Fresh {
                selection_id,
                superseded,
            } => {
                if let Some(old) = superseded {
                    // The buyer abandoned the previous attempt; retire it so
                    // at most one selection stays pending.
                    self.dispatcher.dispatch::<PaymentSelection>(
                        old.0,
                        AGG_SELECTION,
                        SelectionCommand::RecordFailed(RecordFailed {
                            selection_id: old,
                            reason: Some("superseded by a new payment selection".to_string()),
                            order_id: None,
                            occurred_at: now,
                        }),
                        |id| PaymentSelection::empty(SelectionId::new(id)),
                    )?;
                }

                self.dispatcher.dispatch::<PaymentSelection>(
                    selection_id.0,
                    AGG_SELECTION,
                    SelectionCommand::CreateSelection(CreateSelection {
                        selection_id,
                        buyer_id,
                        method,
                        provider_reference: provider_reference.to_string(),
                        occurred_at: now,
                    }),
                    |id| PaymentSelection::empty(SelectionId::new(id)),
                )?;

                Ok(selection_id)
            }
        }
    }
}
