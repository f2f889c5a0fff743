// src/services/webhooks.rs

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    gateway::{
        PaymentGateway, PaymentIntent,
        webhook::{GatewayEvent, GatewayEventKind},
    },
    models::{Actor, AppointmentStatus, PaymentRecordStatus, PaymentStatus},
    services::{authorize_appointment, booking::claim_queue_position},
    store::Store,
};

/// What a gateway notification did to our records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Confirmed {
        appointment_id: Uuid,
        queue_number: Option<i32>,
    },
    Overflow {
        appointment_id: Uuid,
    },
    Cancelled {
        appointment_id: Uuid,
    },
    Processing {
        appointment_id: Uuid,
    },
    /// The appointment already left PENDING_PAYMENT; nothing changed.
    AlreadyProcessed {
        appointment_id: Uuid,
        status: AppointmentStatus,
    },
    /// Resync found the intent still open on the gateway side.
    AwaitingPayment {
        appointment_id: Uuid,
        intent_status: String,
    },
    /// No appointment carries this intent.
    Unmatched {
        intent_id: String,
    },
    DuplicateEvent {
        event_id: String,
    },
    Ignored {
        event_type: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Succeeded,
    Failed,
    Canceled,
    Processing,
}

#[derive(Debug, Clone)]
struct EventRef {
    id: String,
    event_type: String,
}

pub struct PaymentReconciler<S: Store> {
    store: Arc<S>,
    gateway: Arc<dyn PaymentGateway>,
}

impl<S: Store> PaymentReconciler<S> {
    pub fn new(store: Arc<S>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    /// Entry point for verified webhook events. Safe under duplicate and
    /// out-of-order delivery.
    pub async fn handle_event(&self, event: GatewayEvent) -> Result<ReconcileOutcome, ApiError> {
        let event_ref = EventRef {
            id: event.id,
            event_type: event.event_type,
        };

        let (resolution, intent) = match event.kind {
            GatewayEventKind::PaymentSucceeded(pi) => (Resolution::Succeeded, pi),
            GatewayEventKind::PaymentFailed(pi) => (Resolution::Failed, pi),
            GatewayEventKind::PaymentCanceled(pi) => (Resolution::Canceled, pi),
            GatewayEventKind::PaymentProcessing(pi) => (Resolution::Processing, pi),
            GatewayEventKind::Other => {
                tracing::debug!(event_id = %event_ref.id, event_type = %event_ref.event_type, "webhook ignored");
                return Ok(ReconcileOutcome::Ignored {
                    event_type: event_ref.event_type,
                });
            }
        };

        self.reconcile(Some(event_ref), intent, resolution).await
    }

    pub async fn payment_succeeded(
        &self,
        event_id: Option<String>,
        intent: PaymentIntent,
    ) -> Result<ReconcileOutcome, ApiError> {
        let event_ref = event_id.map(|id| EventRef {
            id,
            event_type: "payment_intent.succeeded".into(),
        });
        self.reconcile(event_ref, intent, Resolution::Succeeded).await
    }

    pub async fn payment_failed(
        &self,
        event_id: Option<String>,
        intent: PaymentIntent,
    ) -> Result<ReconcileOutcome, ApiError> {
        let event_ref = event_id.map(|id| EventRef {
            id,
            event_type: "payment_intent.payment_failed".into(),
        });
        self.reconcile(event_ref, intent, Resolution::Failed).await
    }

    /// Pulls the intent from the gateway and applies the same reconciliation a
    /// webhook would have. For when a notification got lost.
    pub async fn sync_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
    ) -> Result<ReconcileOutcome, ApiError> {
        let actor = actor.clone();
        let intent_id = self
            .store
            .transaction(move |tx| {
                Box::pin(async move {
                    let appointment = tx
                        .appointment(appointment_id)
                        .await?
                        .ok_or_else(|| ApiError::not_found("appointment"))?;
                    authorize_appointment(&actor, &appointment)?;
                    appointment.payment_intent_id.ok_or_else(|| {
                        ApiError::validation("Appointment has no online payment to sync")
                    })
                })
            })
            .await?;

        let intent = self.gateway.get_payment_intent(&intent_id).await?;

        let resolution = match intent.status.as_str() {
            "succeeded" => Resolution::Succeeded,
            "canceled" => Resolution::Canceled,
            "processing" => Resolution::Processing,
            other => {
                return Ok(ReconcileOutcome::AwaitingPayment {
                    appointment_id,
                    intent_status: other.to_string(),
                });
            }
        };

        self.reconcile(None, intent, resolution).await
    }

    /// One transaction per notification: event dedup, status guard, and the
    /// resulting writes commit together or not at all.
    async fn reconcile(
        &self,
        event: Option<EventRef>,
        intent: PaymentIntent,
        resolution: Resolution,
    ) -> Result<ReconcileOutcome, ApiError> {
        let intent_id = intent.id.clone();
        let event_id = event.as_ref().map(|e| e.id.clone());
        let now = Utc::now();

        let outcome = self
            .store
            .transaction(move |tx| {
                Box::pin(async move {
                    if let Some(event) = &event {
                        if !tx.record_webhook_event(&event.id, &event.event_type).await? {
                            return Ok(ReconcileOutcome::DuplicateEvent {
                                event_id: event.id.clone(),
                            });
                        }
                    }

                    let Some(mut appointment) =
                        tx.appointment_by_intent_for_update(&intent.id).await?
                    else {
                        return Ok(ReconcileOutcome::Unmatched {
                            intent_id: intent.id.clone(),
                        });
                    };
                    let appointment_id = appointment.appointment_id;

                    if appointment.status != AppointmentStatus::PendingPayment {
                        return Ok(ReconcileOutcome::AlreadyProcessed {
                            appointment_id,
                            status: appointment.status,
                        });
                    }

                    let mut payment = tx.payment_by_intent_for_update(&intent.id).await?;

                    let outcome = match resolution {
                        Resolution::Succeeded => {
                            let queue_number = match appointment.schedule_id {
                                Some(schedule_id) => {
                                    let schedule = tx
                                        .lock_schedule(schedule_id)
                                        .await?
                                        .ok_or_else(|| ApiError::not_found("schedule"))?;
                                    // None here means full
                                    claim_queue_position(&mut *tx, &schedule).await?.map(Some)
                                }
                                None => Some(None),
                            };

                            appointment.payment_status = PaymentStatus::Paid;
                            appointment.paid_at = Some(now);

                            let outcome = match queue_number {
                                Some(queue_number) => {
                                    appointment.status = AppointmentStatus::Confirmed;
                                    appointment.queue_number = queue_number;
                                    ReconcileOutcome::Confirmed {
                                        appointment_id,
                                        queue_number,
                                    }
                                }
                                None => {
                                    appointment.status = AppointmentStatus::Overflow;
                                    appointment.append_note(
                                        "Paid after the schedule filled up; needs a refund or a new slot",
                                    );
                                    ReconcileOutcome::Overflow { appointment_id }
                                }
                            };

                            if let Some(payment) = payment.as_mut() {
                                payment.status = PaymentRecordStatus::Completed;
                                payment.external_charge_id = intent.latest_charge.clone();
                                payment.appointment_id.get_or_insert(appointment_id);
                            }
                            outcome
                        }
                        Resolution::Failed | Resolution::Canceled => {
                            appointment.status = AppointmentStatus::Cancelled;
                            appointment.payment_status = PaymentStatus::Unpaid;
                            appointment.cancelled_at = Some(now);
                            appointment.append_note(if resolution == Resolution::Failed {
                                "Payment failed"
                            } else {
                                "Payment was canceled"
                            });

                            if let Some(payment) = payment.as_mut() {
                                if payment.status != PaymentRecordStatus::Completed {
                                    payment.status = PaymentRecordStatus::Failed;
                                }
                            }
                            ReconcileOutcome::Cancelled { appointment_id }
                        }
                        Resolution::Processing => {
                            appointment.payment_status = PaymentStatus::Processing;
                            if let Some(payment) = payment.as_mut() {
                                if payment.status == PaymentRecordStatus::Pending {
                                    payment.status = PaymentRecordStatus::Processing;
                                }
                            }
                            ReconcileOutcome::Processing { appointment_id }
                        }
                    };

                    tx.update_appointment(&appointment).await?;
                    if let Some(payment) = &payment {
                        if resolution == Resolution::Succeeded && payment.amount_cents != intent.amount {
                            tracing::warn!(
                                appointment_id = %appointment_id,
                                intent_id = %intent.id,
                                expected = payment.amount_cents,
                                received = intent.amount,
                                "paid amount differs from the recorded price"
                            );
                        }
                        tx.update_payment(payment).await?;
                    }

                    Ok(outcome)
                })
            })
            .await
            .inspect_err(|e| {
                tracing::error!(intent_id = %intent_id, event_id = ?event_id, error = %e, "payment reconciliation failed")
            })?;

        match &outcome {
            ReconcileOutcome::Confirmed {
                appointment_id,
                queue_number,
            } => tracing::info!(
                appointment_id = %appointment_id,
                intent_id = %intent_id,
                queue_number = ?queue_number,
                "appointment confirmed by payment"
            ),
            ReconcileOutcome::Overflow { appointment_id } => tracing::warn!(
                appointment_id = %appointment_id,
                intent_id = %intent_id,
                "payment arrived for a full schedule; appointment in overflow"
            ),
            ReconcileOutcome::Cancelled { appointment_id } => tracing::info!(
                appointment_id = %appointment_id,
                intent_id = %intent_id,
                "appointment cancelled by payment failure"
            ),
            ReconcileOutcome::Processing { appointment_id } => tracing::info!(
                appointment_id = %appointment_id,
                intent_id = %intent_id,
                "payment processing"
            ),
            ReconcileOutcome::AlreadyProcessed {
                appointment_id,
                status,
            } => tracing::warn!(
                appointment_id = %appointment_id,
                intent_id = %intent_id,
                status = %status,
                "payment notification for an already processed appointment"
            ),
            ReconcileOutcome::Unmatched { .. } => tracing::warn!(
                intent_id = %intent_id,
                "payment notification matches no appointment"
            ),
            ReconcileOutcome::DuplicateEvent { event_id } => tracing::warn!(
                event_id = %event_id,
                intent_id = %intent_id,
                "duplicate webhook delivery"
            ),
            ReconcileOutcome::AwaitingPayment { .. } | ReconcileOutcome::Ignored { .. } => {}
        }

        Ok(outcome)
    }
}
