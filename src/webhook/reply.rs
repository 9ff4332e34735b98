//! cXML acknowledgment envelopes returned to the carrier.
//!
//! Replies are sent asynchronously through the REST API, so the webhook
//! always acknowledges with an empty document.

use axum::http::header;
use axum::response::{IntoResponse, Response};

const EMPTY_DOCUMENT: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response></Response>";

/// An empty cXML acknowledgment.
pub fn empty() -> Response {
    (
        [(header::CONTENT_TYPE, "application/xml")],
        EMPTY_DOCUMENT,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn empty_document_is_xml_with_200() {
        let response = empty();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/xml"
        );
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body.as_ref(), EMPTY_DOCUMENT.as_bytes());
    }
}
