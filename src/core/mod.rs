pub mod converter;
pub mod pipeline;
pub mod sniff;
