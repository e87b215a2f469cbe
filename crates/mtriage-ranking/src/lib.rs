//! Computer-vision prediction files (CvJson) and label rankings over them

pub mod cvjson;
pub mod plugin;

pub use cvjson::{cvjson_etype, flatten, from_preds, rank, FlatFrame, LabelPredictions, Predictions};
