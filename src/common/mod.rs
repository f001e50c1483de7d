//! Common types and utilities shared by the packaging layer.

pub mod xml;
