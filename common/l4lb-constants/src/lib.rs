#![no_std]

pub mod anycast;
pub mod checkpoint;
pub mod codes;
pub mod env;
pub mod net;
pub mod versions;
