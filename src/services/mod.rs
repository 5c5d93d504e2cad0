/// Business logic services layer
mod integration;
mod supervisor;
mod validator;

#[cfg(test)]
pub(crate) mod testing;

pub use integration::{Diagnostics, SensorReading};
pub use supervisor::{ReloadHandle, Supervisor};
pub use validator::{CredentialValidator, Validated};
