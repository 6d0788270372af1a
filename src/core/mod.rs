// src/core/mod.rs

pub mod activation;
pub mod context;
pub mod inheritance;
pub mod interpolator;
pub mod management;
pub mod normalizer;
pub mod paths;
pub mod problems;
pub mod profiles;
pub mod resolver;
pub mod sources;
pub mod validator;
pub mod version;
