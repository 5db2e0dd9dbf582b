pub mod advisor;
pub mod aligner;
pub mod calibrator;
pub mod forecaster;
