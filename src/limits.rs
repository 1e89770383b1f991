//! Hard limits guarding the engine against runaway inputs.

use crate::model::Minute;

pub const MAX_STAFF: usize = 10_000;
pub const MAX_SERVICES: usize = 10_000;
pub const MAX_INTERVALS_PER_BUCKET: usize = 500;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_CUSTOMER_LEN: usize = 256;
pub const MAX_ROLES_PER_STAFF: usize = 32;

/// Longest single appointment: one full day.
pub const MAX_SERVICE_MINUTES: Minute = 24 * 60;

/// Widest date range a listing query may span.
pub const MAX_QUERY_DAYS: i64 = 62;
