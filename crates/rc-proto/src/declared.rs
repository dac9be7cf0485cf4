//! Protocols whose schemes are recognized ahead of their codecs.

use rc_types::Endpoint;

use crate::{ParseError, Parser};

/// Registry placeholder: the scheme is accepted (so feeds carrying it are
/// counted rather than dropped as unknown), but parse/encode report a typed
/// unimplemented error.
pub struct DeclaredParser {
    protocol: &'static str,
}

impl DeclaredParser {
    pub fn new(protocol: &'static str) -> Self {
        Self { protocol }
    }
}

impl Parser for DeclaredParser {
    fn protocol(&self) -> &'static str {
        self.protocol
    }

    fn parse(&self, _uri: &str) -> Result<Endpoint, ParseError> {
        Err(ParseError::Unimplemented(self.protocol))
    }

    fn encode(&self, _endpoint: &Endpoint) -> Result<String, ParseError> {
        Err(ParseError::Unimplemented(self.protocol))
    }

    fn validate(&self, _endpoint: &Endpoint) -> Result<(), ParseError> {
        Err(ParseError::Unimplemented(self.protocol))
    }
}
