use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use tokio::sync::OwnedRwLockWriteGuard;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{booking_window, check_no_conflict, check_qualified, check_shift};
use super::{Engine, EngineError};

/// A request to book one service with one staff member (or "Any").
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub branch_id: Ulid,
    pub customer: String,
    pub category_id: Option<Ulid>,
    pub service: ServiceRef,
    pub staff: StaffChoice,
    pub date: NaiveDate,
    /// Requested start, minutes since midnight.
    pub start: Minute,
}

/// Changes to an existing appointment; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct RescheduleRequest {
    pub date: Option<NaiveDate>,
    pub start: Option<Minute>,
    pub service: Option<ServiceRef>,
    pub staff: Option<Ulid>,
}

type BucketGuard = OwnedRwLockWriteGuard<DayBucket>;

impl Engine {
    /// Book an appointment. On success exactly one interval was added to one
    /// staff member's bucket; on any error nothing was.
    pub async fn reserve(&self, req: BookingRequest) -> Result<Appointment, EngineError> {
        let started = Instant::now();
        let result = self.reserve_inner(&req).await;
        let outcome = match &result {
            Ok(_) => "confirmed",
            Err(e) => e.code(),
        };
        metrics::counter!(observability::BOOKINGS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(observability::BOOKING_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        match &result {
            Ok(appt) => tracing::info!(
                appointment = %appt.id,
                staff = %appt.staff_id,
                branch = %appt.branch_id,
                "booked {} {}-{}",
                appt.date,
                appt.window.start,
                appt.window.end
            ),
            Err(e) => tracing::debug!(branch = %req.branch_id, "booking rejected: {e}"),
        }
        result
    }

    async fn reserve_inner(&self, req: &BookingRequest) -> Result<Appointment, EngineError> {
        let customer = req.customer.trim();
        if customer.is_empty() {
            return Err(EngineError::InvalidRequest("customer must not be empty".into()));
        }
        if customer.len() > MAX_CUSTOMER_LEN {
            return Err(EngineError::LimitExceeded("customer name too long"));
        }
        let service = self.resolve_service(req.branch_id, &req.service)?;
        let window = booking_window(&service, req.start)?;

        match req.staff {
            StaffChoice::Specific(staff_id) => {
                let staff = self.staff_in_branch(req.branch_id, staff_id)?;
                check_qualified(&staff, &service)?;
                self.try_commit(&staff, &service, req, customer, window).await
            }
            StaffChoice::Any => self.reserve_any(&service, req, customer, window).await,
        }
    }

    /// First qualified staff member, in registration order, who can take the window.
    async fn reserve_any(
        &self,
        service: &ServiceDefinition,
        req: &BookingRequest,
        customer: &str,
        window: Window,
    ) -> Result<Appointment, EngineError> {
        let mut lock_timed_out = false;
        for staff in self
            .roster(req.branch_id)
            .into_iter()
            .filter(|s| s.can_perform(service))
        {
            match self.try_commit(&staff, service, req, customer, window).await {
                Ok(appt) => return Ok(appt),
                Err(EngineError::Busy) => lock_timed_out = true,
                Err(
                    EngineError::OutsideShift { .. }
                    | EngineError::StaffBusy { .. }
                    | EngineError::LimitExceeded(_),
                ) => {}
                Err(e) => return Err(e),
            }
        }
        Err(if lock_timed_out {
            EngineError::Busy
        } else {
            EngineError::NoStaffAvailable
        })
    }

    /// Check and commit one booking for `staff` under their bucket's write lock.
    async fn try_commit(
        &self,
        staff: &StaffMember,
        service: &ServiceDefinition,
        req: &BookingRequest,
        customer: &str,
        window: Window,
    ) -> Result<Appointment, EngineError> {
        check_shift(staff, req.date, &window)?;

        let key = BucketKey::new(req.branch_id, staff.id, req.date);
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_bucket_write(key).await?;
        check_no_conflict(&guard, &window, None)?;

        let id = Ulid::new();
        guard.insert_interval(BookedInterval::active(id, window));

        let event = Event::AppointmentBooked {
            id,
            branch_id: req.branch_id,
            staff_id: staff.id,
            service_id: service.id,
            category_id: req.category_id.or(service.category_id),
            customer: customer.to_string(),
            date: req.date,
            window,
        };
        if let Err(e) = self.persist(&event).await {
            guard.remove_interval(id);
            tracing::warn!(staff = %staff.id, "rolled back uncommitted booking {id}");
            return Err(e);
        }

        let appointment = Appointment {
            id,
            branch_id: req.branch_id,
            staff_id: staff.id,
            service_id: service.id,
            category_id: req.category_id.or(service.category_id),
            customer: customer.to_string(),
            date: req.date,
            window,
            status: AppointmentStatus::Booked,
        };
        self.appointments.insert(id, appointment.clone());
        drop(guard);
        self.notify.send(&event);
        Ok(appointment)
    }

    /// Book a walk-in starting at `now` (branch-local).
    pub async fn walk_in(
        &self,
        branch_id: Ulid,
        customer: String,
        service: ServiceRef,
        staff: StaffChoice,
        now: NaiveDateTime,
    ) -> Result<Appointment, EngineError> {
        let start = (now.hour() * 60 + now.minute()) as Minute;
        self.reserve(BookingRequest {
            branch_id,
            customer,
            category_id: None,
            service,
            staff,
            date: now.date(),
            start,
        })
        .await
    }

    /// Write-lock two buckets in key order. The second guard is `None` when
    /// both keys name the same bucket.
    async fn lock_bucket_pair(
        &self,
        a: BucketKey,
        b: BucketKey,
    ) -> Result<(BucketGuard, Option<BucketGuard>), EngineError> {
        if a == b {
            return Ok((self.lock_bucket_write(a).await?, None));
        }
        if a < b {
            let ga = self.lock_bucket_write(a).await?;
            let gb = self.lock_bucket_write(b).await?;
            Ok((ga, Some(gb)))
        } else {
            let gb = self.lock_bucket_write(b).await?;
            let ga = self.lock_bucket_write(a).await?;
            Ok((ga, Some(gb)))
        }
    }

    /// Move a booked appointment to a new date, time, service or staff member.
    /// If the move is rejected or cannot be journaled the original booking stands.
    pub async fn reschedule(&self, id: Ulid, req: RescheduleRequest) -> Result<Appointment, EngineError> {
        let current = self.get_appointment(id)?;
        if current.status != AppointmentStatus::Booked {
            return Err(EngineError::InvalidRequest(format!(
                "cannot reschedule a {:?} appointment",
                current.status
            )));
        }
        let branch_id = current.branch_id;
        let service = match &req.service {
            Some(r) => self.resolve_service(branch_id, r)?,
            None => self.resolve_service(branch_id, &ServiceRef::Id(current.service_id))?,
        };
        let staff = self.staff_in_branch(branch_id, req.staff.unwrap_or(current.staff_id))?;
        check_qualified(&staff, &service)?;
        let date = req.date.unwrap_or(current.date);
        let window = booking_window(&service, req.start.unwrap_or(current.window.start))?;
        check_shift(&staff, date, &window)?;

        let old_key = current.bucket_key();
        let new_key = BucketKey::new(branch_id, staff.id, date);

        let _gate = self.commit_gate.read().await;
        let (mut old_guard, mut new_guard) = self.lock_bucket_pair(old_key, new_key).await?;

        // Someone else moved or cancelled it between our read and the lock.
        if self.appointments.get(&id).map(|a| a.value().clone()) != Some(current.clone()) {
            return Err(EngineError::Busy);
        }

        let target: &DayBucket = match &new_guard {
            Some(g) => &**g,
            None => &*old_guard,
        };
        check_no_conflict(target, &window, Some(id))?;

        let event = Event::AppointmentRescheduled {
            id,
            branch_id,
            staff_id: staff.id,
            service_id: service.id,
            date,
            window,
        };
        self.persist(&event).await?;

        if old_guard.remove_interval(id).is_none() {
            return Err(EngineError::invariant(format!(
                "booked appointment {id} had no interval in its bucket"
            )));
        }
        new_guard
            .as_mut()
            .unwrap_or(&mut old_guard)
            .insert_interval(BookedInterval::active(id, window));

        let updated = Appointment {
            staff_id: staff.id,
            service_id: service.id,
            date,
            window,
            ..current
        };
        self.appointments.insert(id, updated.clone());
        drop(new_guard);
        drop(old_guard);
        self.notify.send(&event);
        tracing::info!(appointment = %id, staff = %staff.id, "rescheduled to {date} {}-{}", window.start, window.end);
        Ok(updated)
    }

    /// Move a booked appointment to `status`. `cancelled` and `no_show` free the
    /// staff member's time; `completed` keeps it. Repeating the current status
    /// is a no-op.
    pub async fn set_status(&self, id: Ulid, status: AppointmentStatus) -> Result<Appointment, EngineError> {
        self.transition(id, status).await.map(|(appt, _)| appt)
    }

    /// Like `set_status`, also reporting whether this call changed anything.
    /// The decision is made under the bucket lock.
    async fn transition(
        &self,
        id: Ulid,
        status: AppointmentStatus,
    ) -> Result<(Appointment, bool), EngineError> {
        if status == AppointmentStatus::Booked {
            return Err(EngineError::InvalidRequest(
                "booked is only valid as the initial status".into(),
            ));
        }
        let current = self.get_appointment(id)?;
        let _gate = self.commit_gate.read().await;
        let mut guard = self.lock_bucket_write(current.bucket_key()).await?;

        let latest = self.get_appointment(id)?;
        if latest.bucket_key() != current.bucket_key() {
            return Err(EngineError::Busy);
        }
        if latest.status == status {
            return Ok((latest, false));
        }
        if latest.status != AppointmentStatus::Booked {
            return Err(EngineError::InvalidRequest(format!(
                "appointment is already {:?}",
                latest.status
            )));
        }

        let event = Event::AppointmentStatusChanged {
            id,
            branch_id: latest.branch_id,
            status,
        };
        self.persist(&event).await?;
        if !status.holds_slot() {
            guard.cancel(id);
        }
        let updated = Appointment { status, ..latest };
        self.appointments.insert(id, updated.clone());
        drop(guard);
        self.notify.send(&event);
        tracing::info!(appointment = %id, "status -> {status:?}");
        Ok((updated, true))
    }

    /// Cancel an appointment, releasing its slot. Returns `Ok(true)` only for
    /// the call that released it; unknown ids and appointments whose slot is
    /// already released return `Ok(false)`.
    pub async fn cancel_appointment(&self, id: Ulid) -> Result<bool, EngineError> {
        let released = |engine: &Self| {
            engine
                .appointments
                .get(&id)
                .is_none_or(|a| !a.status.holds_slot())
        };
        if released(self) {
            return Ok(false);
        }
        match self.transition(id, AppointmentStatus::Cancelled).await {
            Ok((_, changed)) => Ok(changed),
            // Lost a race to another release (e.g. no_show) of the same slot.
            Err(EngineError::InvalidRequest(_)) if released(self) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
