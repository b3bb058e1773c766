//! Common utilities and types shared across gateway components.

#![warn(clippy::pedantic)]

/// Module for JWT utilities (structure, header decoding, time claims, clock)
pub mod jwt;
