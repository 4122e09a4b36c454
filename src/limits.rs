// Hard limits enforced on input. Everything that grows with client input is
// bounded here.

pub const MAX_CAFES: usize = 10_000;
pub const MAX_TABLES_PER_CAFE: usize = 500;
pub const MAX_LOCATIONS_PER_CAFE: usize = 64;
pub const MAX_OCCASIONS_PER_CAFE: usize = 64;
pub const MAX_RESERVATIONS_PER_CAFE: usize = 200_000;
pub const MAX_TABLE_CAPACITY: u32 = 100;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_DESCRIPTION_LEN: usize = 1_000;
pub const MAX_OPEN_FLOWS: usize = 100_000;
pub const MAX_SQL_LEN: usize = 16 * 1024;
