//! Learned sub-models of the detection ensemble.
//!
//! All models consume normalized feature vectors and take an explicit random
//! source for construction and training.

pub mod autoencoder;
pub mod cnn;
pub mod isolation_forest;
pub mod layers;
