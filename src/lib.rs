// src/lib.rs

//! ERATV registry sync library

pub mod broker;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
