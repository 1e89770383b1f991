use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

impl Engine {
    /// Every staff member of `branch_id` with their status at `minute` on `date`,
    /// in registration order. Takes read locks only.
    pub async fn snapshot(
        &self,
        branch_id: Ulid,
        date: NaiveDate,
        minute: Minute,
    ) -> Result<Vec<StaffAvailability>, EngineError> {
        if !(0..MINUTES_PER_DAY).contains(&minute) {
            return Err(EngineError::InvalidTime(minute.to_string()));
        }
        metrics::counter!(observability::SNAPSHOTS_TOTAL).increment(1);

        let roster = self.roster(branch_id);
        let mut out = Vec::with_capacity(roster.len());
        for staff in roster {
            let status = if !staff.shift.is_on_shift(date, minute) {
                StaffStatus::OffShift
            } else {
                let key = BucketKey::new(branch_id, staff.id, date);
                match self.lock_bucket_read(key).await? {
                    Some(guard) => match guard.busy_at(minute) {
                        Some(interval) => StaffStatus::Busy {
                            until: interval.window.end,
                            appointment_id: interval.appointment_id,
                        },
                        None => StaffStatus::Available,
                    },
                    None => StaffStatus::Available,
                }
            };
            out.push(StaffAvailability {
                staff_id: staff.id,
                name: staff.name,
                branch_id,
                status,
            });
        }
        Ok(out)
    }

    /// Only the staff who are free right at `minute`.
    pub async fn available_staff(
        &self,
        branch_id: Ulid,
        date: NaiveDate,
        minute: Minute,
    ) -> Result<Vec<StaffAvailability>, EngineError> {
        let mut all = self.snapshot(branch_id, date, minute).await?;
        all.retain(|s| s.status.is_available());
        Ok(all)
    }
}
