pub mod bytesize_utils;
pub mod metrics;
pub mod task_id_layer;
