use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.appointments
            .get(&id)
            .map(|a| a.value().clone())
            .ok_or_else(|| EngineError::not_found("appointment", id))
    }

    /// All of a branch's appointments on one day, any status, ordered by start.
    pub fn list_appointments(&self, branch_id: Ulid, date: NaiveDate) -> Vec<Appointment> {
        let mut out: Vec<Appointment> = self
            .appointments
            .iter()
            .filter(|a| a.branch_id == branch_id && a.date == date)
            .map(|a| a.value().clone())
            .collect();
        out.sort_by_key(|a| (a.window.start, a.id));
        out
    }

    /// Appointments for `from..=to`, ordered by date then start.
    pub fn list_appointments_between(
        &self,
        branch_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Appointment>, EngineError> {
        if to < from {
            return Err(EngineError::InvalidRequest("`to` is before `from`".into()));
        }
        if (to - from).num_days() >= MAX_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("date range too wide"));
        }
        let mut out: Vec<Appointment> = self
            .appointments
            .iter()
            .filter(|a| a.branch_id == branch_id && a.date >= from && a.date <= to)
            .map(|a| a.value().clone())
            .collect();
        out.sort_by_key(|a| (a.date, a.window.start, a.id));
        Ok(out)
    }
}
