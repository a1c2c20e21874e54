#![allow(dead_code)]

pub mod drawlab_env;
pub mod session;
