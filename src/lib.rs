pub mod engine_config;
pub mod frame_runner;
pub mod geometry_utils;
pub mod perception;
pub mod systems;
pub mod tracking;

pub type Point2D = (f32, f32);
