//! Hard caps on what a client can make the server hold.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_LOCATIONS_PER_TENANT: usize = 10_000;
pub const MAX_BOOKINGS_PER_LOCATION: usize = 50_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TITLE_LEN: usize = 512;
pub const MAX_ORGANIZER_LEN: usize = 256;
pub const MAX_DOCUMENT_LEN: usize = 16 * 1024;

pub const MAX_BATCH_SIZE: usize = 1000;
