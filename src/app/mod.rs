pub mod fusion_use_case;
pub mod ports;
