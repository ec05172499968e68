//! Core primitives shared by every layer of the executive

pub mod time;
