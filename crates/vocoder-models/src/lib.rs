//! Concrete vocoders trainable by `vocoder-training`.

pub mod linear;
pub mod optim;

pub use linear::{LinearVocoder, LinearVocoderConfig};
pub use optim::{Sgd, StepLr};
