pub mod archive;
pub mod pipeline;
pub mod progress;
pub mod quota;
pub mod staging;
pub mod status;
pub mod upload;
