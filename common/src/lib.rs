pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gpio;
pub mod link;
pub mod outbox;
pub mod provisioning;
pub mod router;
pub mod timer;
pub mod topics;
pub mod types;
pub mod value;

pub use client::{HandlerRegistry, VwireClient};
pub use config::{PinMapping, PlatformCaps, VwireSettings};
pub use credentials::StoredCredentials;
pub use error::VwireError;
pub use gpio::{GpioBackend, GpioManager, GpioMode};
pub use link::{Clock, ConnectOptions, InboundMessage, Network, Transport, TransportError};
pub use provisioning::{Provisioner, ProvisioningPoll, ProvisioningRequest, ProvisioningState};
pub use timer::SoftTimer;
pub use topics::*;
pub use types::{ConnectionState, OtaCommand, OtaOutcome, TransportKind};
pub use value::PinValue;
