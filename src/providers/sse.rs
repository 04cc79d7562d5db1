//! Server-sent events framing for streamed responses

use std::collections::VecDeque;
use futures_util::stream;
use log::trace;

use crate::error::ProviderError;
use crate::providers::anthropic::StreamEvent;
use crate::providers::EventStream;

/// One complete SSE frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame
{   pub event: Option<String>
  , pub data: String
}

/// Incremental decoder; bytes may arrive split anywhere, including
/// inside a UTF-8 sequence
#[derive(Debug, Default)]
pub struct SseDecoder
{   buffer: Vec<u8>
  , event: Option<String>
  , data_lines: Vec<String>
}

impl SseDecoder
{   pub fn new() -> Self
    {   Self::default()
    }

    /// Feed bytes, returning every frame completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame>
    {   self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n')
        {   let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(frame) = self.consume_line(line)
            {   frames.push(frame);
            }
        }
        frames
    }

    /// Flush a trailing frame when the connection closes without a
    /// blank line
    pub fn finish(&mut self) -> Option<SseFrame>
    {   if !self.buffer.is_empty()
        {   let raw = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&raw).into_owned();
            let line = line.trim_end_matches('\r').to_string();
            if let Some(frame) = self.consume_line(&line)
            {   return Some(frame);
            }
        }
        self.take_frame()
    }

    fn consume_line(&mut self, line: &str) -> Option<SseFrame>
    {   if line.is_empty()
        {   return self.take_frame();
        }
        if let Some(rest) = line.strip_prefix("data:")
        {   self.data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("event:")
        {   self.event = Some(rest.trim().to_string());
        }
        // comments (":") and id/retry fields are ignored
        None
    }

    fn take_frame(&mut self) -> Option<SseFrame>
    {   let event = self.event.take();
        if self.data_lines.is_empty()
        {   return None;
        }
        let data = std::mem::take(&mut self.data_lines).join("\n");
        Some(SseFrame { event, data })
    }
}

/// Parse a frame's JSON payload into a provider event
pub fn parse_frame(frame: &SseFrame) -> Result<StreamEvent, ProviderError>
{   trace!("SSE frame {:?}: {}", frame.event, frame.data);
    Ok(serde_json::from_str(&frame.data)?)
}

struct DecodeState
{   response: reqwest::Response
  , decoder: SseDecoder
  , pending: VecDeque<Result<StreamEvent, ProviderError>>
  , done: bool
}

/// Turn a streaming HTTP response into provider events, in arrival order
pub fn decode_events(response: reqwest::Response) -> EventStream
{   let state = DecodeState
    {   response
      , decoder: SseDecoder::new()
      , pending: VecDeque::new()
      , done: false
    };

    Box::pin(stream::unfold(state, |mut state| async move {
      loop
      {   if let Some(item) = state.pending.pop_front()
          {   return Some((item, state));
          }
          if state.done
          {   return None;
          }
          match state.response.chunk().await
          {   Ok(Some(bytes)) => {
                for frame in state.decoder.push(&bytes)
                {   state.pending.push_back(parse_frame(&frame));
                }
              }
            , Ok(None) => {
                state.done = true;
                if let Some(frame) = state.decoder.finish()
                {   state.pending.push_back(parse_frame(&frame));
                }
              }
            , Err(e) => {
                state.done = true;
                state.pending.push_back(Err(ProviderError::from(e)));
              }
          }
      }
    }))
}
