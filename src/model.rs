use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

/// Minutes since branch-local midnight. The only time-of-day type.
pub type Minute = i32;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

/// Half-open window `[start, end)` in minutes of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Minute,
    pub end: Minute,
}

impl Window {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_minute(&self, t: Minute) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_window(&self, other: &Window) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Shift calendar ───────────────────────────────────────────────

/// Set of working weekdays, one bit per day starting at Monday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: WeekdaySet = WeekdaySet(0);
    pub const ALL: WeekdaySet = WeekdaySet(0b111_1111);

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        (0..7u8)
            .filter(move |i| self.0 & (1 << i) != 0)
            .filter_map(|i| Weekday::try_from(i).ok())
    }
}

impl FromIterator<Weekday> for WeekdaySet {
    fn from_iter<I: IntoIterator<Item = Weekday>>(iter: I) -> Self {
        let mut set = WeekdaySet::EMPTY;
        for day in iter {
            set.insert(day);
        }
        set
    }
}

// Serialized as weekday codes ("Mon", "Tue", ...) so the JSON and WAL forms match
// what the staff subsystem stores.
impl Serialize for WeekdaySet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let codes: Vec<String> = self.iter().map(|d| d.to_string()).collect();
        codes.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for WeekdaySet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let codes = Vec::<String>::deserialize(deserializer)?;
        codes
            .iter()
            .map(|c| {
                c.trim()
                    .parse::<Weekday>()
                    .map_err(|_| serde::de::Error::custom(format!("invalid weekday code: {c}")))
            })
            .collect()
    }
}

/// A staff member's bookable hours: working days plus a daily `[start, end)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shift {
    pub working_days: WeekdaySet,
    pub hours: Window,
}

impl Shift {
    pub fn works_on(&self, date: NaiveDate) -> bool {
        self.working_days.contains(date.weekday())
    }

    /// True if `minute` on `date` falls inside the shift.
    pub fn is_on_shift(&self, date: NaiveDate, minute: Minute) -> bool {
        self.works_on(date) && self.hours.contains_minute(minute)
    }
}

// ── Foreign inputs (mirrored from the staff/service subsystems) ──

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: Ulid,
    pub branch_id: Ulid,
    pub name: String,
    pub shift: Shift,
    /// Specialization tags, e.g. "stylist", "nail-tech".
    pub roles: Vec<String>,
    /// Registration order within the engine; drives "Any" selection.
    pub seq: u64,
}

impl StaffMember {
    pub fn can_perform(&self, service: &ServiceDefinition) -> bool {
        match &service.specialization {
            None => true,
            Some(required) => self.roles.iter().any(|r| r.eq_ignore_ascii_case(required)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: Ulid,
    pub branch_id: Ulid,
    pub category_id: Option<Ulid>,
    pub name: String,
    pub duration_minutes: Minute,
    pub specialization: Option<String>,
}

// ── Booked intervals ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalStatus {
    Active,
    Cancelled,
}

/// One staff member's commitment to one appointment on one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookedInterval {
    pub appointment_id: Ulid,
    pub window: Window,
    pub status: IntervalStatus,
}

impl BookedInterval {
    pub fn active(appointment_id: Ulid, window: Window) -> Self {
        Self {
            appointment_id,
            window,
            status: IntervalStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == IntervalStatus::Active
    }
}

/// Identifies one interval bucket: a single staff member's day at a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub branch_id: Ulid,
    pub staff_id: Ulid,
    pub date: NaiveDate,
}

impl BucketKey {
    pub fn new(branch_id: Ulid, staff_id: Ulid, date: NaiveDate) -> Self {
        Self {
            branch_id,
            staff_id,
            date,
        }
    }
}

/// All intervals for one bucket, sorted by `window.start`.
#[derive(Debug, Clone)]
pub struct DayBucket {
    pub key: BucketKey,
    pub intervals: Vec<BookedInterval>,
}

impl DayBucket {
    pub fn new(key: BucketKey) -> Self {
        Self {
            key,
            intervals: Vec::new(),
        }
    }

    /// Insert interval maintaining sort order by window.start.
    pub fn insert_interval(&mut self, interval: BookedInterval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.window.start, |i| i.window.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    /// Physically remove an interval. Only used to roll back an uncommitted insert
    /// and to move an interval between buckets.
    pub fn remove_interval(&mut self, appointment_id: Ulid) -> Option<BookedInterval> {
        let pos = self
            .intervals
            .iter()
            .position(|i| i.appointment_id == appointment_id)?;
        Some(self.intervals.remove(pos))
    }

    pub fn find(&self, appointment_id: Ulid) -> Option<&BookedInterval> {
        self.intervals.iter().find(|i| i.appointment_id == appointment_id)
    }

    /// Return only active intervals whose window overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Window) -> impl Iterator<Item = &BookedInterval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.window.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.is_active() && i.window.end > query.start)
    }

    pub fn active_count(&self) -> usize {
        self.intervals.iter().filter(|i| i.is_active()).count()
    }

    /// Drop cancelled intervals; returns how many were removed.
    pub fn prune_released(&mut self) -> usize {
        let before = self.intervals.len();
        self.intervals.retain(BookedInterval::is_active);
        before - self.intervals.len()
    }
}

// ── Appointments ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Booked,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    /// Whether an appointment in this status still occupies its staff member's time.
    pub fn holds_slot(&self) -> bool {
        matches!(self, AppointmentStatus::Booked | AppointmentStatus::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub branch_id: Ulid,
    pub staff_id: Ulid,
    pub service_id: Ulid,
    pub category_id: Option<Ulid>,
    pub customer: String,
    pub date: NaiveDate,
    pub window: Window,
    pub status: AppointmentStatus,
}

impl Appointment {
    pub fn bucket_key(&self) -> BucketKey {
        BucketKey::new(self.branch_id, self.staff_id, self.date)
    }
}

/// Requested staff: a specific member or the first free qualified one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaffChoice {
    Specific(Ulid),
    Any,
}

impl Serialize for StaffChoice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            StaffChoice::Specific(id) => serializer.serialize_str(&id.to_string()),
            StaffChoice::Any => serializer.serialize_str("Any"),
        }
    }
}

impl<'de> Deserialize<'de> for StaffChoice {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("any") {
            return Ok(StaffChoice::Any);
        }
        Ulid::from_string(trimmed)
            .map(StaffChoice::Specific)
            .map_err(|e| serde::de::Error::custom(format!("invalid staff id {trimmed}: {e}")))
    }
}

/// Service reference as sent by the booking form: an id, or a name within the branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceRef {
    Id(Ulid),
    Name(String),
}

impl Serialize for ServiceRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ServiceRef::Id(id) => serializer.serialize_str(&id.to_string()),
            ServiceRef::Name(name) => serializer.serialize_str(name),
        }
    }
}

impl<'de> Deserialize<'de> for ServiceRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(match Ulid::from_string(raw.trim()) {
            Ok(id) => ServiceRef::Id(id),
            Err(_) => ServiceRef::Name(raw.trim().to_string()),
        })
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StaffRegistered {
        id: Ulid,
        branch_id: Ulid,
        name: String,
        shift: Shift,
        roles: Vec<String>,
    },
    StaffRemoved {
        id: Ulid,
        branch_id: Ulid,
    },
    ServiceRegistered {
        id: Ulid,
        branch_id: Ulid,
        category_id: Option<Ulid>,
        name: String,
        duration_minutes: Minute,
        specialization: Option<String>,
    },
    ServiceRemoved {
        id: Ulid,
        branch_id: Ulid,
    },
    AppointmentBooked {
        id: Ulid,
        branch_id: Ulid,
        staff_id: Ulid,
        service_id: Ulid,
        category_id: Option<Ulid>,
        customer: String,
        date: NaiveDate,
        window: Window,
    },
    AppointmentRescheduled {
        id: Ulid,
        branch_id: Ulid,
        staff_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        window: Window,
    },
    AppointmentStatusChanged {
        id: Ulid,
        branch_id: Ulid,
        status: AppointmentStatus,
    },
}

impl Event {
    pub fn branch_id(&self) -> Ulid {
        match self {
            Event::StaffRegistered { branch_id, .. }
            | Event::StaffRemoved { branch_id, .. }
            | Event::ServiceRegistered { branch_id, .. }
            | Event::ServiceRemoved { branch_id, .. }
            | Event::AppointmentBooked { branch_id, .. }
            | Event::AppointmentRescheduled { branch_id, .. }
            | Event::AppointmentStatusChanged { branch_id, .. } => *branch_id,
        }
    }

    /// Short label for logs and the change feed.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::StaffRegistered { .. } => "staff_registered",
            Event::StaffRemoved { .. } => "staff_removed",
            Event::ServiceRegistered { .. } => "service_registered",
            Event::ServiceRemoved { .. } => "service_removed",
            Event::AppointmentBooked { .. } => "appointment_booked",
            Event::AppointmentRescheduled { .. } => "appointment_rescheduled",
            Event::AppointmentStatusChanged { .. } => "appointment_status_changed",
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StaffStatus {
    Available,
    Busy {
        #[serde(rename = "busy_until")]
        until: Minute,
        appointment_id: Ulid,
    },
    OffShift,
}

impl StaffStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, StaffStatus::Available)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaffAvailability {
    pub staff_id: Ulid,
    pub name: String,
    pub branch_id: Ulid,
    #[serde(flatten)]
    pub status: StaffStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn window_basics() {
        let w = Window::new(600, 645);
        assert_eq!(w.duration(), 45);
        assert!(w.contains_minute(600));
        assert!(w.contains_minute(644));
        assert!(!w.contains_minute(645)); // half-open
    }

    #[test]
    fn window_overlap() {
        let a = Window::new(600, 645);
        let b = Window::new(615, 660);
        let c = Window::new(645, 690);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn window_contains_window() {
        let shift = Window::new(540, 1020);
        assert!(shift.contains_window(&Window::new(540, 585)));
        assert!(shift.contains_window(&shift));
        assert!(!shift.contains_window(&Window::new(1000, 1045)));
    }

    #[test]
    fn weekday_set_membership() {
        let set: WeekdaySet = [Weekday::Mon, Weekday::Wed, Weekday::Sat].into_iter().collect();
        assert!(set.contains(Weekday::Mon));
        assert!(!set.contains(Weekday::Tue));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Weekday::Mon, Weekday::Wed, Weekday::Sat]);
        assert!(WeekdaySet::EMPTY.is_empty());
        assert!(WeekdaySet::ALL.contains(Weekday::Sun));
    }

    #[test]
    fn weekday_set_json_codes() {
        let set: WeekdaySet = serde_json::from_str(r#"["mon", "Tuesday", " Fri "]"#).unwrap();
        assert!(set.contains(Weekday::Mon));
        assert!(set.contains(Weekday::Tue));
        assert!(set.contains(Weekday::Fri));
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["Mon","Tue","Fri"]"#);

        let bad: Result<WeekdaySet, _> = serde_json::from_str(r#"["Funday"]"#);
        assert!(bad.is_err());
    }

    #[test]
    fn shift_checks_day_and_hours() {
        let shift = Shift {
            working_days: [Weekday::Mon, Weekday::Tue].into_iter().collect(),
            hours: Window::new(9 * 60, 17 * 60),
        };
        let monday = date(2024, 6, 3);
        let sunday = date(2024, 6, 2);
        assert!(shift.is_on_shift(monday, 9 * 60));
        assert!(shift.is_on_shift(monday, 17 * 60 - 1));
        assert!(!shift.is_on_shift(monday, 17 * 60));
        assert!(!shift.is_on_shift(monday, 8 * 60 + 59));
        assert!(!shift.is_on_shift(sunday, 10 * 60));
    }

    #[test]
    fn bucket_insert_keeps_order() {
        let mut bucket = DayBucket::new(BucketKey::new(Ulid::new(), Ulid::new(), date(2024, 6, 3)));
        bucket.insert_interval(BookedInterval::active(Ulid::new(), Window::new(700, 745)));
        bucket.insert_interval(BookedInterval::active(Ulid::new(), Window::new(600, 645)));
        bucket.insert_interval(BookedInterval::active(Ulid::new(), Window::new(645, 690)));
        let starts: Vec<_> = bucket.intervals.iter().map(|i| i.window.start).collect();
        assert_eq!(starts, vec![600, 645, 700]);
    }

    #[test]
    fn overlapping_skips_cancelled_and_adjacent() {
        let mut bucket = DayBucket::new(BucketKey::new(Ulid::new(), Ulid::new(), date(2024, 6, 3)));
        bucket.insert_interval(BookedInterval::active(Ulid::new(), Window::new(540, 600)));
        bucket.insert_interval(BookedInterval {
            appointment_id: Ulid::new(),
            window: Window::new(600, 660),
            status: IntervalStatus::Cancelled,
        });
        bucket.insert_interval(BookedInterval::active(Ulid::new(), Window::new(660, 720)));

        let query = Window::new(600, 660);
        assert_eq!(bucket.overlapping(&query).count(), 0);

        let wide = Window::new(590, 670);
        assert_eq!(bucket.overlapping(&wide).count(), 2);
        assert_eq!(bucket.active_count(), 2);
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let mut bucket = DayBucket::new(BucketKey::new(Ulid::new(), Ulid::new(), date(2024, 6, 3)));
        bucket.insert_interval(BookedInterval::active(Ulid::new(), Window::new(600, 645)));
        assert!(bucket.remove_interval(Ulid::new()).is_none());
        assert_eq!(bucket.intervals.len(), 1);
    }

    #[test]
    fn staff_choice_parses_any_and_ids() {
        let any: StaffChoice = serde_json::from_str(r#""Any""#).unwrap();
        assert_eq!(any, StaffChoice::Any);
        let any_lower: StaffChoice = serde_json::from_str(r#""any""#).unwrap();
        assert_eq!(any_lower, StaffChoice::Any);

        let id = Ulid::new();
        let specific: StaffChoice = serde_json::from_str(&format!("\"{id}\"")).unwrap();
        assert_eq!(specific, StaffChoice::Specific(id));

        let bad: Result<StaffChoice, _> = serde_json::from_str(r#""bob""#);
        assert!(bad.is_err());
    }

    #[test]
    fn service_ref_falls_back_to_name() {
        let by_name: ServiceRef = serde_json::from_str(r#"" Hair Cut ""#).unwrap();
        assert_eq!(by_name, ServiceRef::Name("Hair Cut".into()));
        let id = Ulid::new();
        let by_id: ServiceRef = serde_json::from_str(&format!("\"{id}\"")).unwrap();
        assert_eq!(by_id, ServiceRef::Id(id));
    }

    #[test]
    fn staff_qualification() {
        let staff = StaffMember {
            id: Ulid::new(),
            branch_id: Ulid::new(),
            name: "Ana".into(),
            shift: Shift {
                working_days: WeekdaySet::ALL,
                hours: Window::new(540, 1020),
            },
            roles: vec!["Stylist".into()],
            seq: 0,
        };
        let mut service = ServiceDefinition {
            id: Ulid::new(),
            branch_id: staff.branch_id,
            category_id: None,
            name: "Cut".into(),
            duration_minutes: 45,
            specialization: Some("stylist".into()),
        };
        assert!(staff.can_perform(&service));
        service.specialization = Some("nail-tech".into());
        assert!(!staff.can_perform(&service));
        service.specialization = None;
        assert!(staff.can_perform(&service));
    }

    #[test]
    fn staff_status_json_shape() {
        let entry = StaffAvailability {
            staff_id: Ulid::new(),
            name: "Ana".into(),
            branch_id: Ulid::new(),
            status: StaffStatus::Busy {
                until: 645,
                appointment_id: Ulid::new(),
            },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "busy");
        assert_eq!(json["busy_until"], 645);
        assert_eq!(json["name"], "Ana");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::AppointmentBooked {
            id: Ulid::new(),
            branch_id: Ulid::new(),
            staff_id: Ulid::new(),
            service_id: Ulid::new(),
            category_id: None,
            customer: "Dana".into(),
            date: date(2024, 6, 3),
            window: Window::new(600, 645),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
