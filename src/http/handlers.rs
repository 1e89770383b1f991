use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::clock::{format_clock, parse_clock, parse_duration};
use crate::engine::{BookingRequest, Engine, EngineError, RescheduleRequest, ServiceInput, StaffInput};
use crate::model::*;

use super::error::ApiResult;
use super::extract::{ApiJson, ApiPath, ApiQuery};

type AppState = State<Arc<Engine>>;

// ── Response views ───────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AppointmentView {
    #[serde(flatten)]
    pub appointment: Appointment,
    pub start_time: String,
    pub end_time: String,
}

impl From<Appointment> for AppointmentView {
    fn from(appointment: Appointment) -> Self {
        Self {
            start_time: format_clock(appointment.window.start),
            end_time: format_clock(appointment.window.end),
            appointment,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WindowView {
    pub start: Minute,
    pub end: Minute,
    pub start_time: String,
    pub end_time: String,
}

impl From<Window> for WindowView {
    fn from(w: Window) -> Self {
        Self {
            start: w.start,
            end: w.end,
            start_time: format_clock(w.start),
            end_time: format_clock(w.end),
        }
    }
}

// ── Request bodies / queries ─────────────────────────────────────

fn any_staff() -> StaffChoice {
    StaffChoice::Any
}

#[derive(Debug, Deserialize)]
pub struct CreateAppointment {
    pub customer: String,
    #[serde(default)]
    pub category_id: Option<Ulid>,
    pub service: ServiceRef,
    #[serde(default = "any_staff")]
    pub staff: StaffChoice,
    pub date: NaiveDate,
    /// Clock text, "10:00" or "10:00 AM".
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub struct WalkIn {
    pub customer: String,
    pub service: ServiceRef,
    #[serde(default = "any_staff")]
    pub staff: StaffChoice,
    /// Branch-local time of arrival; defaults to the server's local clock.
    #[serde(default)]
    pub at: Option<NaiveDateTime>,
}

#[derive(Debug, Deserialize)]
pub struct Reschedule {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub service: Option<ServiceRef>,
    #[serde(default)]
    pub staff: Option<Ulid>,
}

#[derive(Debug, Deserialize)]
pub struct StatusChange {
    pub status: AppointmentStatus,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
    pub time: String,
    /// `available` keeps only free staff.
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FreeQuery {
    pub date: NaiveDate,
    #[serde(default)]
    pub min_duration: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

// ── Handlers ─────────────────────────────────────────────────────

pub async fn health() -> &'static str {
    "ok"
}

pub async fn availability(
    State(engine): AppState,
    ApiPath(branch_id): ApiPath<Ulid>,
    ApiQuery(q): ApiQuery<AvailabilityQuery>,
) -> ApiResult<Json<Vec<StaffAvailability>>> {
    let minute = parse_clock(&q.time)?;
    let entries = match q.status.as_deref() {
        None | Some("") | Some("all") => engine.snapshot(branch_id, q.date, minute).await?,
        Some("available") => engine.available_staff(branch_id, q.date, minute).await?,
        Some(other) => {
            return Err(EngineError::InvalidRequest(format!("unknown status filter {other:?}")).into());
        }
    };
    Ok(Json(entries))
}

pub async fn free_windows(
    State(engine): AppState,
    ApiPath((branch_id, staff_id)): ApiPath<(Ulid, Ulid)>,
    ApiQuery(q): ApiQuery<FreeQuery>,
) -> ApiResult<Json<Vec<WindowView>>> {
    let min_duration = q.min_duration.as_deref().map(parse_duration).transpose()?;
    let free = engine
        .free_windows(branch_id, staff_id, q.date, min_duration)
        .await?;
    Ok(Json(free.into_iter().map(WindowView::from).collect()))
}

pub async fn create_appointment(
    State(engine): AppState,
    ApiPath(branch_id): ApiPath<Ulid>,
    ApiJson(body): ApiJson<CreateAppointment>,
) -> ApiResult<(StatusCode, Json<AppointmentView>)> {
    let start = parse_clock(&body.time)?;
    let appointment = engine
        .reserve(BookingRequest {
            branch_id,
            customer: body.customer,
            category_id: body.category_id,
            service: body.service,
            staff: body.staff,
            date: body.date,
            start,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(appointment.into())))
}

pub async fn walk_in(
    State(engine): AppState,
    ApiPath(branch_id): ApiPath<Ulid>,
    ApiJson(body): ApiJson<WalkIn>,
) -> ApiResult<(StatusCode, Json<AppointmentView>)> {
    let now = body.at.unwrap_or_else(|| chrono::Local::now().naive_local());
    let appointment = engine
        .walk_in(branch_id, body.customer, body.service, body.staff, now)
        .await?;
    Ok((StatusCode::CREATED, Json(appointment.into())))
}

pub async fn list_appointments(
    State(engine): AppState,
    ApiPath(branch_id): ApiPath<Ulid>,
    ApiQuery(q): ApiQuery<ListQuery>,
) -> ApiResult<Json<Vec<AppointmentView>>> {
    let appointments = match (q.date, q.from, q.to) {
        (Some(date), None, None) => engine.list_appointments(branch_id, date),
        (None, Some(from), Some(to)) => engine.list_appointments_between(branch_id, from, to)?,
        _ => {
            return Err(EngineError::InvalidRequest("pass either `date` or both `from` and `to`".into()).into());
        }
    };
    Ok(Json(appointments.into_iter().map(AppointmentView::from).collect()))
}

pub async fn get_appointment(
    State(engine): AppState,
    ApiPath(id): ApiPath<Ulid>,
) -> ApiResult<Json<AppointmentView>> {
    Ok(Json(engine.get_appointment(id)?.into()))
}

pub async fn reschedule(
    State(engine): AppState,
    ApiPath(id): ApiPath<Ulid>,
    ApiJson(body): ApiJson<Reschedule>,
) -> ApiResult<Json<AppointmentView>> {
    let start = body.time.as_deref().map(parse_clock).transpose()?;
    let appointment = engine
        .reschedule(
            id,
            RescheduleRequest {
                date: body.date,
                start,
                service: body.service,
                staff: body.staff,
            },
        )
        .await?;
    Ok(Json(appointment.into()))
}

pub async fn set_status(
    State(engine): AppState,
    ApiPath(id): ApiPath<Ulid>,
    ApiJson(body): ApiJson<StatusChange>,
) -> ApiResult<Json<AppointmentView>> {
    Ok(Json(engine.set_status(id, body.status).await?.into()))
}

pub async fn cancel_appointment(
    State(engine): AppState,
    ApiPath(id): ApiPath<Ulid>,
) -> ApiResult<Json<serde_json::Value>> {
    let cancelled = engine.cancel_appointment(id).await?;
    Ok(Json(serde_json::json!({ "id": id, "cancelled": cancelled })))
}

pub async fn put_staff(
    State(engine): AppState,
    ApiPath(id): ApiPath<Ulid>,
    ApiJson(body): ApiJson<StaffInput>,
) -> ApiResult<Json<StaffMember>> {
    Ok(Json(engine.register_staff(id, body).await?))
}

pub async fn delete_staff(State(engine): AppState, ApiPath(id): ApiPath<Ulid>) -> ApiResult<StatusCode> {
    engine.remove_staff(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn put_service(
    State(engine): AppState,
    ApiPath(id): ApiPath<Ulid>,
    ApiJson(body): ApiJson<ServiceInput>,
) -> ApiResult<Json<ServiceDefinition>> {
    Ok(Json(engine.register_service(id, body).await?))
}

pub async fn delete_service(State(engine): AppState, ApiPath(id): ApiPath<Ulid>) -> ApiResult<StatusCode> {
    engine.remove_service(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
