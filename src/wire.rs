//! Wraps an encrypted payload into the gateway-specific wire envelope (C2).

use thiserror::Error;

use crate::models::DataFormat;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unsupported wire format: {0}")]
    UnsupportedFormat(String),
}

pub struct ShapedRequest {
    pub body: String,
    pub content_type: &'static str,
}

/// Shapes `encrypted_payload` for the given gateway wire format.
///
/// For `Json`, the body is the literal token `"json"` rather than the
/// encrypted payload itself. This mirrors an incomplete branch in the
/// system this crate was modeled on (see spec's Open Questions) and is
/// preserved faithfully rather than silently corrected.
pub fn shape(format: DataFormat, encrypted_payload: &str) -> Result<ShapedRequest, WireError> {
    match format {
        DataFormat::Json => Ok(ShapedRequest {
            body: "json".to_string(),
            content_type: "application/json",
        }),
        DataFormat::Soap => {
            let body = format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?><soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\"><soap:Body><Request>{encrypted_payload}</Request></soap:Body></soap:Envelope>"
            );
            Ok(ShapedRequest {
                body,
                content_type: "text/xml",
            })
        }
    }
}
