// src/services/cancellation.rs

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::ApiError,
    gateway::PaymentGateway,
    models::{Actor, Appointment, AppointmentStatus, Payment, PaymentStatus},
    refund_policy::{RefundDecision, compute_refund_decision},
    services::{authorize_appointment, ensure_transition},
    store::Store,
};

/// What happened to the money after a cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefundOutcome {
    NotEligible,
    /// Nothing was paid.
    NotRequired,
    /// The appointment was cancelled earlier; no second refund is attempted.
    AlreadyProcessed,
    /// Paid outside the gateway (cash, card terminal); staff settle it.
    ManualSettlement { amount_cents: i64 },
    Refunded { refund_id: String, amount_cents: i64 },
    /// The cancellation stands; the refund needs attention.
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationResult {
    pub appointment: Appointment,
    pub refund_decision: RefundDecision,
    pub refund: RefundOutcome,
}

pub struct CancellationService<S: Store> {
    store: Arc<S>,
    gateway: Arc<dyn PaymentGateway>,
}

enum Cancelled {
    Now {
        appointment: Appointment,
        payment: Option<Payment>,
    },
    Earlier(Appointment),
}

pub fn refund_idempotency_key(appointment_id: Uuid) -> String {
    format!("refund-{appointment_id}")
}

impl<S: Store> CancellationService<S> {
    pub fn new(store: Arc<S>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    pub async fn cancel_appointment(
        &self,
        actor: &Actor,
        appointment_id: Uuid,
        reason: Option<String>,
    ) -> Result<CancellationResult, ApiError> {
        let now = Utc::now();
        let tx_actor = actor.clone();

        let cancelled = self
            .store
            .transaction(move |tx| {
                Box::pin(async move {
                    let mut appointment = tx
                        .appointment_for_update(appointment_id)
                        .await?
                        .ok_or_else(|| ApiError::not_found("appointment"))?;
                    authorize_appointment(&tx_actor, &appointment)?;

                    if appointment.status == AppointmentStatus::Cancelled {
                        return Ok(Cancelled::Earlier(appointment));
                    }
                    ensure_transition(appointment.status, AppointmentStatus::Cancelled)?;

                    appointment.status = AppointmentStatus::Cancelled;
                    appointment.cancelled_at = Some(now);
                    if appointment.payment_status != PaymentStatus::Paid {
                        appointment.payment_status = PaymentStatus::Unpaid;
                    }

                    let who = tx_actor.role.as_str();
                    match reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
                        Some(reason) => appointment.append_note(&format!("Cancelled by {who}: {reason}")),
                        None => appointment.append_note(&format!("Cancelled by {who}")),
                    }

                    if let Some(slot_id) = appointment.time_slot_id {
                        tx.set_time_slot_booked(slot_id, false).await?;
                    }
                    tx.update_appointment(&appointment).await?;

                    let payment = tx.payment_for_appointment(appointment_id).await?;
                    Ok(Cancelled::Now {
                        appointment,
                        payment,
                    })
                })
            })
            .await?;

        let (appointment, payment) = match cancelled {
            Cancelled::Earlier(appointment) => {
                let refund_decision = compute_refund_decision(actor.role, now, appointment.start_at);
                return Ok(CancellationResult {
                    appointment,
                    refund_decision,
                    refund: RefundOutcome::AlreadyProcessed,
                });
            }
            Cancelled::Now {
                appointment,
                payment,
            } => (appointment, payment),
        };

        let refund_decision = compute_refund_decision(actor.role, now, appointment.start_at);
        tracing::info!(
            appointment_id = %appointment_id,
            schedule_id = ?appointment.schedule_id,
            role = actor.role.as_str(),
            refund = ?refund_decision.kind,
            "appointment cancelled"
        );

        let refund = self
            .execute_refund(&appointment, payment, &refund_decision)
            .await;

        Ok(CancellationResult {
            appointment,
            refund_decision,
            refund,
        })
    }

    /// Runs after the cancellation committed. Never undoes it.
    async fn execute_refund(
        &self,
        appointment: &Appointment,
        payment: Option<Payment>,
        decision: &RefundDecision,
    ) -> RefundOutcome {
        if !decision.eligible {
            return RefundOutcome::NotEligible;
        }
        if appointment.payment_status != PaymentStatus::Paid {
            return RefundOutcome::NotRequired;
        }

        let Some(payment) = payment else {
            return RefundOutcome::ManualSettlement { amount_cents: 0 };
        };
        let amount_cents = payment.refundable_cents();
        if amount_cents == 0 {
            return RefundOutcome::NotRequired;
        }
        let Some(intent_id) = payment.external_intent_id.clone() else {
            return RefundOutcome::ManualSettlement { amount_cents };
        };

        let appointment_id = appointment.appointment_id;
        let refund_id = match self
            .gateway
            .refund(&intent_id, amount_cents, &refund_idempotency_key(appointment_id))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(
                    appointment_id = %appointment_id,
                    intent_id = %intent_id,
                    amount_cents,
                    error = %e,
                    "refund failed after cancellation"
                );
                return RefundOutcome::Failed {
                    message: e.to_string(),
                };
            }
        };

        let recorded = self
            .store
            .transaction(move |tx| {
                Box::pin(async move {
                    let Some(mut payment) = tx.payment_by_intent_for_update(&intent_id).await?
                    else {
                        return Ok(());
                    };
                    payment.refunded_cents = (payment.refunded_cents + amount_cents).min(payment.amount_cents);
                    tx.update_payment(&payment).await
                })
            })
            .await;

        if let Err(e) = recorded {
            tracing::error!(
                appointment_id = %appointment_id,
                refund_id = %refund_id,
                error = %e,
                "refund issued but not recorded"
            );
        } else {
            tracing::info!(
                appointment_id = %appointment_id,
                refund_id = %refund_id,
                amount_cents,
                "refund issued"
            );
        }

        RefundOutcome::Refunded {
            refund_id,
            amount_cents,
        }
    }
}
