pub mod commands;
pub mod convert;
pub mod devices;
pub mod error;
pub mod events;
pub mod frame;
pub mod topics;

pub use commands::*;
pub use devices::{DeviceMeta, DeviceRegistry};
pub use error::{ConversionError, ListingError, ParseError, ValidationError};
pub use events::{ControlCode, Event, EventTranslator, PublishIntent};
pub use frame::FrameExtractor;
pub use topics::*;
