// src/services/mod.rs

use crate::{
    error::ApiError,
    models::{Actor, Appointment, AppointmentStatus, Role},
};
use uuid::Uuid;

pub mod booking;
pub mod cancellation;
pub mod lifecycle;
pub mod reschedule;
pub mod schedules;
pub mod webhooks;

/*
Who may act on an appointment:
- patient: only their own
- doctor: only appointments of their own practice
- admin: any
*/
pub fn authorize_appointment(actor: &Actor, appointment: &Appointment) -> Result<(), ApiError> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::Patient => {
            if actor.patient_id == Some(appointment.patient_id) {
                Ok(())
            } else {
                Err(ApiError::forbidden(
                    "Patients can only manage their own appointments",
                ))
            }
        }
        Role::Doctor => {
            if actor.doctor_id == Some(appointment.doctor_id) {
                Ok(())
            } else {
                Err(ApiError::forbidden(
                    "Doctors can only manage appointments of their own practice",
                ))
            }
        }
    }
}

/// Staff-only actions scoped to one doctor's practice.
pub fn ensure_practice(actor: &Actor, doctor_id: Uuid) -> Result<(), ApiError> {
    match actor.role {
        Role::Admin => Ok(()),
        Role::Doctor if actor.doctor_id == Some(doctor_id) => Ok(()),
        Role::Doctor => Err(ApiError::forbidden(
            "Doctors can only manage their own practice",
        )),
        Role::Patient => Err(ApiError::forbidden("Only doctors and admins can do this")),
    }
}

pub fn ensure_not_terminal(current: AppointmentStatus) -> Result<(), ApiError> {
    if current.is_terminal() {
        return Err(ApiError::BadRequest(
            "INVALID_TRANSITION",
            format!("Appointment is already {current}; no further changes allowed"),
        ));
    }
    Ok(())
}

pub fn ensure_transition(
    current: AppointmentStatus,
    next: AppointmentStatus,
) -> Result<(), ApiError> {
    ensure_not_terminal(current)?;
    if !current.can_transition_to(next) {
        return Err(ApiError::BadRequest(
            "INVALID_TRANSITION",
            format!("Cannot move an appointment from {current} to {next}"),
        ));
    }
    Ok(())
}
