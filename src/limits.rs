/// Longest bookable service: one full day.
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_CUSTOMER_NAME_LEN: usize = 100;
pub const MAX_LOCATION_LEN: usize = 200;

pub const MAX_CENTERS: usize = 10_000;
pub const MAX_SERVICES: usize = 10_000;

/// Non-cancelled bookings a single center may hold on one date.
pub const MAX_BOOKINGS_PER_DAY: usize = 500;

/// Upper bound for the alternative-date scan horizon.
pub const MAX_HORIZON_DAYS: u32 = 60;

pub const MAX_BUFFER_MINUTES: u32 = 240;
