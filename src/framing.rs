//! Splitting the inbound byte stream into command messages.
//!
//! Each message is one JSON object. Objects may follow each other directly or
//! be separated by whitespace; senders should end every object with a newline.
//! A read can carry several objects or only part of one, so bytes are buffered
//! until an object is complete.

use serde_json::Value;

use crate::command::CommandRecord;
use crate::errors::Error;

/// One decoded unit of the command stream.
#[derive(Debug)]
pub enum Frame {
    Command(CommandRecord),
    /// `{}`, which carries nothing to apply.
    Empty,
    Malformed(Error),
}

/// Incremental decoder for the command stream.
///
/// # Example
///
/// ```
/// use bulb_endpoint::{CommandDecoder, CommandRecord, Frame};
///
/// let mut decoder = CommandDecoder::new(1024);
/// assert!(decoder.push(br#"{"command":2,"val"#).is_empty());
///
/// let frames = decoder.push(b"ue\":75}\n{\"command\":1,\"value\":1}\n");
/// assert!(matches!(frames[0], Frame::Command(r) if r == CommandRecord::new(2, 75)));
/// assert!(matches!(frames[1], Frame::Command(r) if r == CommandRecord::new(1, 1)));
/// ```
#[derive(Debug)]
pub struct CommandDecoder {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl CommandDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        CommandDecoder {
            buffer: Vec::new(),
            max_frame_len,
        }
    }

    /// Bytes held back waiting for the rest of a message.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop anything buffered from a previous connection.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Feed one read's worth of bytes and take every message it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;

        loop {
            start += self.buffer[start..]
                .iter()
                .take_while(|b| is_separator(**b))
                .count();
            if start == self.buffer.len() {
                break;
            }

            let rest = &self.buffer[start..];
            let mut stream = serde_json::Deserializer::from_slice(rest).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value)) => {
                    start += stream.byte_offset();
                    frames.push(decode(value));
                }
                // Incomplete, wait for the next read
                Some(Err(e)) if e.is_eof() => break,
                Some(Err(e)) => {
                    // Resynchronize on the next line
                    start += rest
                        .iter()
                        .position(|b| *b == b'\n')
                        .map_or(rest.len(), |newline| newline + 1);
                    frames.push(Frame::Malformed(Error::JsonLoad(e)));
                }
                None => break,
            }
        }

        self.buffer.drain(..start);

        if self.buffer.len() > self.max_frame_len {
            let dropped = self.buffer.len();
            self.buffer.clear();
            frames.push(Frame::Malformed(Error::Malformed(format!(
                "incomplete message of {dropped} bytes exceeds the {} byte limit",
                self.max_frame_len
            ))));
        }

        frames
    }
}

// NUL is accepted too, some clients send C strings.
fn is_separator(byte: u8) -> bool {
    byte.is_ascii_whitespace() || byte == 0
}

fn decode(value: Value) -> Frame {
    let Some(map) = value.as_object() else {
        return Frame::Malformed(Error::Malformed(format!("expected an object, got {value}")));
    };
    if map.is_empty() {
        return Frame::Empty;
    }
    match serde_json::from_value::<CommandRecord>(value) {
        Ok(record) => Frame::Command(record),
        Err(e) => Frame::Malformed(Error::Malformed(e.to_string())),
    }
}
