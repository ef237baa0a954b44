pub mod set_bit;
pub mod use_all_solar;
