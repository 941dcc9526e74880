pub mod order_id;
pub mod precision;

pub use order_id::ClientOidGenerator;
pub use precision::{calc_size, format_places, round_down_to_places, round_to_places, tick_size};
