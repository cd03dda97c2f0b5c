pub mod storage;
pub mod uploader;
