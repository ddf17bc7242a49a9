//! Actuator clients

mod dry_run;

pub use dry_run::DryRunActuator;
