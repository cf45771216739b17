//! Line-framed streaming of generated text.
//!
//! Each fragment is written as `0:<JSON string>\n`, the text part of the web
//! client's data-stream protocol. A provider error ends the stream with a
//! single `3:<JSON string>\n` error part.

use crate::services::providers::TextStream;
use axum::{
    body::{Body, Bytes},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};
use futures::{future, Stream, StreamExt};
use std::convert::Infallible;

/// Header the client SDK checks before parsing a data stream.
pub const DATA_STREAM_HEADER: &str = "x-vercel-ai-data-stream";

pub fn text_frame(fragment: &str) -> Bytes {
    frame('0', fragment)
}

pub fn error_frame(message: &str) -> Bytes {
    frame('3', message)
}

fn frame(code: char, payload: &str) -> Bytes {
    let encoded = serde_json::Value::from(payload).to_string();
    let mut line = String::with_capacity(encoded.len() + 3);
    line.push(code);
    line.push(':');
    line.push_str(&encoded);
    line.push('\n');
    Bytes::from(line)
}

/// Frame fragments one at a time, in provider order.
pub fn frame_stream(
    fragments: TextStream,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send {
    fragments
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            let frame = match item {
                Ok(fragment) => text_frame(&fragment),
                Err(e) => {
                    tracing::error!(error = %e, "Generation failed mid-stream");
                    *failed = true;
                    error_frame(&format!("An error occurred: {}", e))
                }
            };
            future::ready(Some(frame))
        })
        .map(Ok)
}

/// Streaming HTTP response for a fragment stream.
pub fn stream_response(fragments: TextStream) -> Response {
    let mut response = Body::from_stream(frame_stream(fragments)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(DATA_STREAM_HEADER, HeaderValue::from_static("v1"));
    response
}
