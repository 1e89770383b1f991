use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

// ── Per-bucket index operations (caller holds the bucket lock) ────

impl DayBucket {
    /// True iff no active interval overlaps `window`, optionally ignoring one
    /// appointment's own interval.
    pub fn is_free(&self, window: &Window, ignore: Option<Ulid>) -> bool {
        self.first_conflict(window, ignore).is_none()
    }

    pub fn first_conflict(&self, window: &Window, ignore: Option<Ulid>) -> Option<&BookedInterval> {
        self.overlapping(window)
            .find(|i| Some(i.appointment_id) != ignore)
    }

    /// Insert an active interval, or fail with the appointment it would overlap.
    pub fn try_insert(&mut self, interval: BookedInterval) -> Result<(), EngineError> {
        if let Some(existing) = self.first_conflict(&interval.window, None) {
            return Err(EngineError::Conflict(existing.appointment_id));
        }
        self.insert_interval(interval);
        Ok(())
    }

    /// Mark an interval cancelled. Unknown or already-cancelled ids are a no-op;
    /// returns whether anything changed.
    pub fn cancel(&mut self, appointment_id: Ulid) -> bool {
        match self
            .intervals
            .iter_mut()
            .find(|i| i.appointment_id == appointment_id)
        {
            Some(interval) if interval.is_active() => {
                interval.status = IntervalStatus::Cancelled;
                true
            }
            _ => false,
        }
    }

    /// The active interval containing `minute`, if any.
    pub fn busy_at(&self, minute: Minute) -> Option<&BookedInterval> {
        self.overlapping(&Window::new(minute, minute + 1)).next()
    }

    /// Free sub-windows of `within` after removing active intervals.
    pub fn free_windows(&self, within: &Window) -> Vec<Window> {
        let booked: Vec<Window> = self.overlapping(within).map(|i| i.window).collect();
        let booked = merge_overlapping(&booked);
        subtract_windows(&[*within], &booked)
    }
}

/// Merge sorted overlapping/adjacent windows into disjoint windows.
pub fn merge_overlapping(sorted: &[Window]) -> Vec<Window> {
    let mut merged: Vec<Window> = Vec::new();
    for &w in sorted {
        if let Some(last) = merged.last_mut()
            && w.start <= last.end
        {
            last.end = last.end.max(w.end);
            continue;
        }
        merged.push(w);
    }
    merged
}

/// Subtract sorted, disjoint `to_remove` windows from sorted `base` windows.
pub fn subtract_windows(base: &[Window], to_remove: &[Window]) -> Vec<Window> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < b.end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Window::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < b.end {
            result.push(Window::new(current_start, b.end));
        }
    }

    result
}

// ── Engine-level read queries ────────────────────────────────────

impl Engine {
    /// Is `window` free for the staff member on `date`? Ignores shifts; the
    /// arbiter checks those separately.
    pub async fn is_free(
        &self,
        branch_id: Ulid,
        staff_id: Ulid,
        date: chrono::NaiveDate,
        window: Window,
    ) -> Result<bool, EngineError> {
        let key = BucketKey::new(branch_id, staff_id, date);
        Ok(match self.lock_bucket_read(key).await? {
            Some(guard) => guard.is_free(&window, None),
            None => true,
        })
    }

    /// Bookable windows for one staff member on `date`: their shift hours minus
    /// active bookings, optionally keeping only windows at least `min_duration` long.
    pub async fn free_windows(
        &self,
        branch_id: Ulid,
        staff_id: Ulid,
        date: chrono::NaiveDate,
        min_duration: Option<Minute>,
    ) -> Result<Vec<Window>, EngineError> {
        let staff = self.staff_in_branch(branch_id, staff_id)?;
        if !staff.shift.works_on(date) {
            return Ok(Vec::new());
        }
        let key = BucketKey::new(branch_id, staff_id, date);
        let mut free = match self.lock_bucket_read(key).await? {
            Some(guard) => guard.free_windows(&staff.shift.hours),
            None => vec![staff.shift.hours],
        };
        if let Some(min) = min_duration {
            free.retain(|w| w.duration() >= min);
        }
        Ok(free)
    }
}
