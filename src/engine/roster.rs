use serde::Deserialize;
use ulid::Ulid;

use crate::clock::{parse_clock, parse_duration};
use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Staff record as synced from the staff subsystem.
#[derive(Debug, Clone, Deserialize)]
pub struct StaffInput {
    pub branch_id: Ulid,
    pub name: String,
    pub working_days: WeekdaySet,
    /// Shift start, e.g. "09:00" or "9:00 am".
    pub start: String,
    pub end: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Service record as synced from the service catalog. `duration` is the
/// catalog's free text ("45 min", "1 hr 30 min").
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceInput {
    pub branch_id: Ulid,
    #[serde(default)]
    pub category_id: Option<Ulid>,
    pub name: String,
    pub duration: String,
    #[serde(default)]
    pub specialization: Option<String>,
}

fn check_name(name: &str) -> Result<String, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::InvalidRequest("name must not be empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(name.to_string())
}

fn parse_shift(input: &StaffInput) -> Result<Shift, EngineError> {
    if input.working_days.is_empty() {
        return Err(EngineError::InvalidShift("no working days"));
    }
    let start = parse_clock(&input.start)?;
    let end = if input.end.trim() == "24:00" {
        MINUTES_PER_DAY
    } else {
        parse_clock(&input.end)?
    };
    // Overnight shifts would need buckets spanning two dates.
    if end <= start {
        return Err(EngineError::InvalidShift("shift must end after it starts"));
    }
    Ok(Shift {
        working_days: input.working_days,
        hours: Window::new(start, end),
    })
}

impl Engine {
    /// Create or replace a staff member. A staff member never moves between
    /// branches; re-registering keeps their place in the roster order.
    pub async fn register_staff(&self, id: Ulid, input: StaffInput) -> Result<StaffMember, EngineError> {
        let name = check_name(&input.name)?;
        if input.roles.len() > MAX_ROLES_PER_STAFF {
            return Err(EngineError::LimitExceeded("too many roles"));
        }
        let roles: Vec<String> = input
            .roles
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();
        let shift = parse_shift(&input)?;

        match self.staff.get(&id).map(|s| s.branch_id) {
            Some(branch_id) if branch_id != input.branch_id => {
                return Err(EngineError::BranchMismatch {
                    entity: "staff",
                    id,
                    branch_id: input.branch_id,
                });
            }
            Some(_) => {}
            None if self.staff.len() >= MAX_STAFF => {
                return Err(EngineError::LimitExceeded("too many staff"));
            }
            None => {}
        }

        let event = Event::StaffRegistered {
            id,
            branch_id: input.branch_id,
            name: name.clone(),
            shift,
            roles: roles.clone(),
        };
        let _gate = self.commit_gate.read().await;
        self.persist(&event).await?;
        let member = self.upsert_staff(id, input.branch_id, name, shift, roles);
        self.notify.send(&event);
        tracing::info!(staff = %id, branch = %input.branch_id, "staff registered");
        Ok(member)
    }

    /// Drop a staff member from the roster. Their existing appointments stay.
    pub async fn remove_staff(&self, id: Ulid) -> Result<(), EngineError> {
        let branch_id = self
            .staff
            .get(&id)
            .map(|s| s.branch_id)
            .ok_or_else(|| EngineError::not_found("staff", id))?;
        let event = Event::StaffRemoved { id, branch_id };
        let _gate = self.commit_gate.read().await;
        self.persist(&event).await?;
        self.staff.remove(&id);
        self.notify.send(&event);
        tracing::info!(staff = %id, branch = %branch_id, "staff removed");
        Ok(())
    }

    pub async fn register_service(
        &self,
        id: Ulid,
        input: ServiceInput,
    ) -> Result<ServiceDefinition, EngineError> {
        let name = check_name(&input.name)?;
        let duration_minutes = parse_duration(&input.duration)?;
        let specialization = input
            .specialization
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        match self.services.get(&id).map(|s| s.branch_id) {
            Some(branch_id) if branch_id != input.branch_id => {
                return Err(EngineError::BranchMismatch {
                    entity: "service",
                    id,
                    branch_id: input.branch_id,
                });
            }
            Some(_) => {}
            None if self.services.len() >= MAX_SERVICES => {
                return Err(EngineError::LimitExceeded("too many services"));
            }
            None => {}
        }

        let service = ServiceDefinition {
            id,
            branch_id: input.branch_id,
            category_id: input.category_id,
            name,
            duration_minutes,
            specialization,
        };
        let event = Event::ServiceRegistered {
            id,
            branch_id: service.branch_id,
            category_id: service.category_id,
            name: service.name.clone(),
            duration_minutes,
            specialization: service.specialization.clone(),
        };
        let _gate = self.commit_gate.read().await;
        self.persist(&event).await?;
        self.services.insert(id, service.clone());
        self.notify.send(&event);
        tracing::info!(service = %id, minutes = duration_minutes, "service registered");
        Ok(service)
    }

    pub async fn remove_service(&self, id: Ulid) -> Result<(), EngineError> {
        let branch_id = self
            .services
            .get(&id)
            .map(|s| s.branch_id)
            .ok_or_else(|| EngineError::not_found("service", id))?;
        let event = Event::ServiceRemoved { id, branch_id };
        let _gate = self.commit_gate.read().await;
        self.persist(&event).await?;
        self.services.remove(&id);
        self.notify.send(&event);
        Ok(())
    }

    /// The branch's staff in registration order.
    pub fn roster(&self, branch_id: Ulid) -> Vec<StaffMember> {
        let mut staff: Vec<StaffMember> = self
            .staff
            .iter()
            .filter(|s| s.branch_id == branch_id)
            .map(|s| s.value().clone())
            .collect();
        staff.sort_by_key(|s| s.seq);
        staff
    }

    pub fn list_services(&self, branch_id: Ulid) -> Vec<ServiceDefinition> {
        let mut services: Vec<ServiceDefinition> = self
            .services
            .iter()
            .filter(|s| s.branch_id == branch_id)
            .map(|s| s.value().clone())
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        services
    }

    /// Look up a staff member, treating one from another branch as missing.
    pub fn staff_in_branch(&self, branch_id: Ulid, staff_id: Ulid) -> Result<StaffMember, EngineError> {
        self.staff
            .get(&staff_id)
            .filter(|s| s.branch_id == branch_id)
            .map(|s| s.value().clone())
            .ok_or_else(|| EngineError::not_found("staff", staff_id))
    }

    /// Resolve a service by id or by case-insensitive name within the branch.
    pub fn resolve_service(&self, branch_id: Ulid, service: &ServiceRef) -> Result<ServiceDefinition, EngineError> {
        match service {
            ServiceRef::Id(id) => self
                .services
                .get(id)
                .filter(|s| s.branch_id == branch_id)
                .map(|s| s.value().clone())
                .ok_or_else(|| EngineError::not_found("service", *id)),
            ServiceRef::Name(name) => self
                .list_services(branch_id)
                .into_iter()
                .find(|s| s.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| EngineError::NotFound(format!("service {name:?}"))),
        }
    }
}
