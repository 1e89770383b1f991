mod arbiter;
mod conflict;
mod error;
mod index;
mod journal;
mod queries;
mod roster;
mod status;

pub use arbiter::{BookingRequest, RescheduleRequest};
pub use error::EngineError;
pub use index::{merge_overlapping, subtract_windows};
pub use journal::{Journal, WalJournal};
pub use roster::{ServiceInput, StaffInput};

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;

pub type SharedBucket = Arc<RwLock<DayBucket>>;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Upper bound on waiting for a bucket lock before answering `Busy`.
    pub lock_wait: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_millis(250),
        }
    }
}

pub struct Engine {
    /// Interval buckets keyed by (branch, staff, date).
    pub(super) buckets: DashMap<BucketKey, SharedBucket>,
    pub(super) staff: DashMap<Ulid, StaffMember>,
    pub(super) services: DashMap<Ulid, ServiceDefinition>,
    pub(super) appointments: DashMap<Ulid, Appointment>,
    pub(super) journal: Arc<dyn Journal>,
    pub notify: Arc<NotifyHub>,
    pub(super) options: EngineOptions,
    /// Held shared by every commit and exclusively by compaction, so a compacted
    /// log never misses an event that was appended but not yet applied.
    pub(super) commit_gate: RwLock<()>,
    pub(super) next_seq: AtomicU64,
}

impl Engine {
    /// Open the WAL at `wal_path`, replay it and start the group-commit writer.
    pub fn new(wal_path: &Path, notify: Arc<NotifyHub>, options: EngineOptions) -> io::Result<Self> {
        let (journal, events) = WalJournal::open(wal_path)?;
        let engine = Self::with_journal(Arc::new(journal), notify, options);
        for event in &events {
            engine.apply_replayed(event);
        }
        tracing::info!(
            "replayed {} events: {} staff, {} services, {} appointments",
            events.len(),
            engine.staff.len(),
            engine.services.len(),
            engine.appointments.len()
        );
        Ok(engine)
    }

    /// Build an empty engine over an arbitrary journal.
    pub fn with_journal(journal: Arc<dyn Journal>, notify: Arc<NotifyHub>, options: EngineOptions) -> Self {
        Self {
            buckets: DashMap::new(),
            staff: DashMap::new(),
            services: DashMap::new(),
            appointments: DashMap::new(),
            journal,
            notify,
            options,
            commit_gate: RwLock::new(()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Apply one replayed event. We're the sole owner of every bucket during
    /// replay, so `try_write` always succeeds; never block here because replay may
    /// run inside an async context.
    fn apply_replayed(&self, event: &Event) {
        match event {
            Event::StaffRegistered { id, branch_id, name, shift, roles } => {
                self.upsert_staff(*id, *branch_id, name.clone(), *shift, roles.clone());
            }
            Event::StaffRemoved { id, .. } => {
                self.staff.remove(id);
            }
            Event::ServiceRegistered {
                id,
                branch_id,
                category_id,
                name,
                duration_minutes,
                specialization,
            } => {
                self.services.insert(
                    *id,
                    ServiceDefinition {
                        id: *id,
                        branch_id: *branch_id,
                        category_id: *category_id,
                        name: name.clone(),
                        duration_minutes: *duration_minutes,
                        specialization: specialization.clone(),
                    },
                );
            }
            Event::ServiceRemoved { id, .. } => {
                self.services.remove(id);
            }
            Event::AppointmentBooked {
                id,
                branch_id,
                staff_id,
                service_id,
                category_id,
                customer,
                date,
                window,
            } => {
                let appointment = Appointment {
                    id: *id,
                    branch_id: *branch_id,
                    staff_id: *staff_id,
                    service_id: *service_id,
                    category_id: *category_id,
                    customer: customer.clone(),
                    date: *date,
                    window: *window,
                    status: AppointmentStatus::Booked,
                };
                let bucket = self.bucket(appointment.bucket_key());
                let mut guard = bucket.try_write().expect("replay: uncontended write");
                guard.insert_interval(BookedInterval::active(*id, *window));
                self.appointments.insert(*id, appointment);
            }
            Event::AppointmentRescheduled {
                id,
                staff_id,
                service_id,
                date,
                window,
                ..
            } => {
                let Some(mut appt) = self.appointments.get_mut(id) else {
                    tracing::warn!("replay: reschedule of unknown appointment {id}");
                    return;
                };
                if let Some(old) = self.buckets.get(&appt.bucket_key()).map(|b| b.value().clone()) {
                    old.try_write().expect("replay: uncontended write").remove_interval(*id);
                }
                appt.staff_id = *staff_id;
                appt.service_id = *service_id;
                appt.date = *date;
                appt.window = *window;
                let bucket = self.bucket(appt.bucket_key());
                bucket
                    .try_write()
                    .expect("replay: uncontended write")
                    .insert_interval(BookedInterval::active(*id, *window));
            }
            Event::AppointmentStatusChanged { id, status, .. } => {
                let Some(mut appt) = self.appointments.get_mut(id) else {
                    tracing::warn!("replay: status change of unknown appointment {id}");
                    return;
                };
                appt.status = *status;
                // Released intervals are not rebuilt.
                if !status.holds_slot()
                    && let Some(bucket) = self.buckets.get(&appt.bucket_key()).map(|b| b.value().clone())
                {
                    bucket.try_write().expect("replay: uncontended write").remove_interval(*id);
                }
            }
        }
    }

    /// Get or create the bucket for `key`.
    pub(super) fn bucket(&self, key: BucketKey) -> SharedBucket {
        self.buckets
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(DayBucket::new(key))))
            .value()
            .clone()
    }

    /// Acquire a bucket's write lock, giving up after `lock_wait`.
    pub(super) async fn lock_bucket_write(
        &self,
        key: BucketKey,
    ) -> Result<OwnedRwLockWriteGuard<DayBucket>, EngineError> {
        let bucket = self.bucket(key);
        match tokio::time::timeout(self.options.lock_wait, bucket.write_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => Err(self.lock_timeout(key)),
        }
    }

    /// Acquire a bucket's read lock. `None` if nothing was ever booked in it.
    pub(super) async fn lock_bucket_read(
        &self,
        key: BucketKey,
    ) -> Result<Option<OwnedRwLockReadGuard<DayBucket>>, EngineError> {
        let Some(bucket) = self.buckets.get(&key).map(|b| b.value().clone()) else {
            return Ok(None);
        };
        match tokio::time::timeout(self.options.lock_wait, bucket.read_owned()).await {
            Ok(guard) => Ok(Some(guard)),
            Err(_) => Err(self.lock_timeout(key)),
        }
    }

    fn lock_timeout(&self, key: BucketKey) -> EngineError {
        tracing::warn!(
            branch = %key.branch_id,
            staff = %key.staff_id,
            date = %key.date,
            "bucket lock wait exceeded {:?}",
            self.options.lock_wait
        );
        metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
        EngineError::Busy
    }

    /// Journal the event; the caller applies it only if this returns Ok.
    pub(super) async fn persist(&self, event: &Event) -> Result<(), EngineError> {
        self.journal.append(event).await.map_err(|e| {
            tracing::error!("journal append failed for {}: {e}", event.kind());
            EngineError::PersistenceFailure(e.to_string())
        })
    }

    pub(super) fn upsert_staff(
        &self,
        id: Ulid,
        branch_id: Ulid,
        name: String,
        shift: Shift,
        roles: Vec<String>,
    ) -> StaffMember {
        let seq = self
            .staff
            .get(&id)
            .map(|s| s.seq)
            .unwrap_or_else(|| self.next_seq.fetch_add(1, Ordering::Relaxed));
        let member = StaffMember {
            id,
            branch_id,
            name,
            shift,
            roles,
            seq,
        };
        self.staff.insert(id, member.clone());
        member
    }

    /// Compact the journal down to the events needed to recreate the current state.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        let mut staff: Vec<StaffMember> = self.staff.iter().map(|e| e.value().clone()).collect();
        staff.sort_by_key(|s| s.seq);
        for s in staff {
            events.push(Event::StaffRegistered {
                id: s.id,
                branch_id: s.branch_id,
                name: s.name,
                shift: s.shift,
                roles: s.roles,
            });
        }
        for entry in self.services.iter() {
            let s = entry.value();
            events.push(Event::ServiceRegistered {
                id: s.id,
                branch_id: s.branch_id,
                category_id: s.category_id,
                name: s.name.clone(),
                duration_minutes: s.duration_minutes,
                specialization: s.specialization.clone(),
            });
        }
        let mut appointments: Vec<Appointment> =
            self.appointments.iter().map(|e| e.value().clone()).collect();
        appointments.sort_by_key(|a| a.id);
        for a in appointments {
            let status = a.status;
            events.push(Event::AppointmentBooked {
                id: a.id,
                branch_id: a.branch_id,
                staff_id: a.staff_id,
                service_id: a.service_id,
                category_id: a.category_id,
                customer: a.customer,
                date: a.date,
                window: a.window,
            });
            if status != AppointmentStatus::Booked {
                events.push(Event::AppointmentStatusChanged {
                    id: a.id,
                    branch_id: a.branch_id,
                    status,
                });
            }
        }

        let count = events.len();
        self.journal.compact(events).await.map_err(|e| {
            tracing::error!("journal compaction failed: {e}");
            EngineError::PersistenceFailure(e.to_string())
        })?;

        // No commit can run while the gate is held, so only readers can be
        // inside a bucket; those are skipped and pruned next time.
        let mut pruned = 0;
        for entry in self.buckets.iter() {
            if let Ok(mut bucket) = entry.value().try_write() {
                pruned += bucket.prune_released();
            }
        }
        tracing::info!("journal compacted to {count} events, pruned {pruned} released intervals");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }
}
