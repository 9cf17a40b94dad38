//! Server-Sent Events decoding for streamed completions
//!
//! Both the OpenAI protocol and Gemini's `alt=sse` mode send one JSON document
//! per `data:` line. Comment lines (`: keep-alive`) and other fields are
//! ignored; `data: [DONE]` ends the stream.

use anyhow::{Context, Result};
use async_stream::try_stream;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::Response;

const DONE_SENTINEL: &str = "[DONE]";

/// Payloads of the `data:` lines of an event stream, in order
pub fn data_lines(response: Response) -> impl Stream<Item = Result<String>> + Send {
    try_stream! {
        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut finished = false;

        'read: while let Some(bytes) = body.next().await {
            let bytes = bytes.context("Failed to read event stream")?;
            buffer.extend_from_slice(&bytes);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                match parse_line(&line) {
                    Line::Data(data) => yield data,
                    Line::Done => {
                        finished = true;
                        break 'read;
                    }
                    Line::Skip => {}
                }
            }
        }

        // trailing line without a newline
        if !finished {
            if let Line::Data(data) = parse_line(&buffer) {
                yield data;
            }
        }
    }
}

#[derive(Debug, PartialEq)]
enum Line {
    Data(String),
    Done,
    Skip,
}

fn parse_line(raw: &[u8]) -> Line {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(data) = line.strip_prefix("data:") else {
        return Line::Skip;
    };
    let data = data.trim();
    if data.is_empty() {
        Line::Skip
    } else if data == DONE_SENTINEL {
        Line::Done
    } else {
        Line::Data(data.to_string())
    }
}
