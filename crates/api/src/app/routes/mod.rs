//! HTTP routes. Only operational endpoints live here.

pub mod system;
