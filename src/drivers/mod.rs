//! Board peripherals.

pub mod button;
