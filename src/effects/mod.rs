// src/effects/mod.rs

pub mod limiter;

pub use limiter::Limiter;
