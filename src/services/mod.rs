pub mod archive;
pub mod batch;
pub mod image_pipeline;
pub mod queue;
pub mod status;
pub mod storage;
pub mod store;
pub mod transform;
pub mod video;
