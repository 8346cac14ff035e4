pub mod background_model;
pub mod frame;
pub mod frame_queue;
pub mod image;
pub mod pixel;
pub mod tracker;
pub mod utils;
