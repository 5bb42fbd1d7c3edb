//! Apiary shared protocol pieces
//!
//! This crate provides the channel naming scheme, the text payload codec,
//! the command registry and the message-bus abstraction shared between the
//! queen (controller) and the drone agents.

pub mod bus;
pub mod channels;
pub mod payload;
pub mod registry;

pub use bus::{BusClient, BusEvent, BusMessage, MessageBus, Subscription};
pub use channels::{ChannelParts, ComChannel, DroneId};
pub use payload::{CommandCall, PayloadError, WireReturn, WireResult};
pub use registry::{CommandEntry, CommandRegistry, RegistryError};
