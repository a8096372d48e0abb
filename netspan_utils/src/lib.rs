#![no_std]
//! Small helpers shared by the netspan crates: canonical byte-order
//! conversions for header fields and sample conversion traits for the
//! audio payload encoders.

pub mod sample_type;
pub mod wire_order;
