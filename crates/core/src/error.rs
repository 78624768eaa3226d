use thiserror::Error;

/// A value fell outside the scale it was declared on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("value {value} is outside {min}..={max}")]
    OutOfRange { value: i64, min: i64, max: i64 },
}

/// Why an event fragment could not be turned into an [`Event`](crate::Event).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed event xml: {0}")]
    Xml(String),
    #[error("fragment has no <Event> element")]
    MissingEvent,
    #[error("event has no node reference")]
    MissingNode,
    #[error("event has an empty control code")]
    MissingControl,
}

/// Why a bus command was rejected before reaching the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown command verb '{0}'")]
    UnknownVerb(String),
    #[error("command has no node address")]
    EmptyNode,
    #[error("{verb} requires an action")]
    MissingAction { verb: &'static str },
    #[error("{verb} does not accept action '{action}' (expected {expected})")]
    InvalidAction {
        verb: &'static str,
        action: String,
        expected: &'static str,
    },
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListingError {
    #[error("malformed device listing: {0}")]
    Xml(String),
    #[error("device listing root is <{0}>, expected <nodes>")]
    UnexpectedRoot(String),
}
