// API处理器模块

pub mod download;
pub mod media;

pub use download::*;
pub use media::*;
