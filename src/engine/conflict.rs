use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// The window a booking of `service` starting at `start` occupies.
pub(crate) fn booking_window(service: &ServiceDefinition, start: Minute) -> Result<Window, EngineError> {
    // Durations are validated when a service is registered, so a bad one here is a bug.
    if service.duration_minutes <= 0 {
        return Err(EngineError::invariant(format!(
            "service {} has non-positive duration {}",
            service.id, service.duration_minutes
        )));
    }
    if service.duration_minutes > MAX_SERVICE_MINUTES {
        return Err(EngineError::InvalidDuration(format!(
            "{} minutes",
            service.duration_minutes
        )));
    }
    if !(0..MINUTES_PER_DAY).contains(&start) {
        return Err(EngineError::InvalidTime(start.to_string()));
    }
    Ok(Window::new(start, start + service.duration_minutes))
}

/// The booking must start on a working day inside the shift hours and finish
/// by midnight.
pub(crate) fn check_shift(staff: &StaffMember, date: NaiveDate, window: &Window) -> Result<(), EngineError> {
    if !staff.shift.is_on_shift(date, window.start) || window.end > MINUTES_PER_DAY {
        return Err(EngineError::OutsideShift {
            staff_id: staff.id,
            date,
            minute: window.start,
        });
    }
    Ok(())
}

pub(crate) fn check_qualified(staff: &StaffMember, service: &ServiceDefinition) -> Result<(), EngineError> {
    if !staff.can_perform(service) {
        return Err(EngineError::NotQualified {
            staff_id: staff.id,
            service_id: service.id,
        });
    }
    Ok(())
}

/// Fails with `StaffBusy` naming the first active interval that overlaps `window`.
/// `ignore` skips an appointment's own interval when it is being moved.
pub(crate) fn check_no_conflict(
    bucket: &DayBucket,
    window: &Window,
    ignore: Option<Ulid>,
) -> Result<(), EngineError> {
    if let Some(existing) = bucket.first_conflict(window, ignore) {
        return Err(EngineError::StaffBusy {
            staff_id: bucket.key.staff_id,
            appointment_id: existing.appointment_id,
        });
    }
    if bucket.active_count() >= MAX_INTERVALS_PER_BUCKET {
        return Err(EngineError::LimitExceeded("too many appointments for staff on day"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
    }

    fn staff() -> StaffMember {
        StaffMember {
            id: Ulid::new(),
            branch_id: Ulid::new(),
            name: "Ana".into(),
            shift: Shift {
                working_days: WeekdaySet::ALL,
                hours: Window::new(540, 1020),
            },
            roles: vec![],
            seq: 0,
        }
    }

    fn service(minutes: Minute) -> ServiceDefinition {
        ServiceDefinition {
            id: Ulid::new(),
            branch_id: Ulid::new(),
            category_id: None,
            name: "Cut".into(),
            duration_minutes: minutes,
            specialization: None,
        }
    }

    #[test]
    fn window_from_service_duration() {
        assert_eq!(booking_window(&service(45), 600).unwrap(), Window::new(600, 645));
    }

    #[test]
    fn non_positive_duration_is_invariant() {
        let err = booking_window(&service(0), 600).unwrap_err();
        assert!(matches!(err, EngineError::Invariant(_)));
    }

    #[test]
    fn start_may_be_late_in_shift() {
        let s = staff();
        check_shift(&s, monday(), &Window::new(1000, 1045)).unwrap();
    }

    #[test]
    fn start_outside_hours_rejected() {
        let s = staff();
        let err = check_shift(&s, monday(), &Window::new(1080, 1125)).unwrap_err();
        assert!(matches!(err, EngineError::OutsideShift { minute: 1080, .. }));
        assert!(check_shift(&s, monday(), &Window::new(1020, 1065)).is_err());
        assert!(check_shift(&s, monday(), &Window::new(539, 584)).is_err());
    }

    #[test]
    fn past_midnight_rejected() {
        let mut s = staff();
        s.shift.hours = Window::new(1200, 1440);
        assert!(check_shift(&s, monday(), &Window::new(1420, 1465)).is_err());
        check_shift(&s, monday(), &Window::new(1395, 1440)).unwrap();
    }

    #[test]
    fn conflict_names_the_blocking_appointment() {
        let mut bucket = DayBucket::new(BucketKey::new(Ulid::new(), Ulid::new(), monday()));
        let blocking = Ulid::new();
        bucket.insert_interval(BookedInterval::active(blocking, Window::new(600, 645)));

        let err = check_no_conflict(&bucket, &Window::new(615, 660), None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::StaffBusy { appointment_id, .. } if appointment_id == blocking
        ));
        check_no_conflict(&bucket, &Window::new(645, 690), None).unwrap();
        check_no_conflict(&bucket, &Window::new(615, 660), Some(blocking)).unwrap();
    }
}
