//! Background retraining on buffered live telemetry.

pub mod retrain;

pub use self::retrain::{run_retrain_loop, RetrainOutcome, Retrainer};
