//! Keystroke decoder: raw terminal bytes to [`KeyEvent`]s.
//!
//! The decoder is a four-state automaton. Bytes are fed one at a time and at
//! most one event comes out per byte. Escape sequences that turn out to be
//! malformed are dropped on the transition that detects them, so recovery is
//! just a return to `Ground`.
//!
//! Input arrives from the transport in chunks. A chunk that ends inside an
//! escape sequence counts as a short read: the partial sequence is discarded
//! and the next chunk starts fresh. This also keeps a lone `ESC` keypress from
//! swallowing whatever the user types next.

use tracing::trace;

use crate::core::types::KeyEvent;

const CTRL_C: u8 = 0x03;
const TAB: u8 = 0x09;
const CR: u8 = 0x0D;
const ESC: u8 = 0x1B;
const DEL: u8 = 0x7F;
const CSI_BRACKET: u8 = b'[';
const DELETE_PREFIX: u8 = b'3';
const DELETE_SUFFIX: u8 = b'~';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Ground,
    SawEscape,
    SawBracket,
    SawDeletePrefix,
}

/// Incremental keystroke decoder for one connection.
#[derive(Debug, Clone)]
pub struct Decoder {
    state: DecodeState,
    finished: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::Ground,
            finished: false,
        }
    }

    /// True while an escape sequence has been started but not completed.
    pub fn is_pending(&self) -> bool {
        self.state != DecodeState::Ground
    }

    /// True once `EndOfInput` has been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Advance the automaton by one byte.
    pub fn feed(&mut self, byte: u8) -> Option<KeyEvent> {
        if self.finished {
            return None;
        }
        match self.state {
            DecodeState::Ground => {
                if byte == ESC {
                    self.state = DecodeState::SawEscape;
                    return None;
                }
                classify_ground(byte)
            }
            DecodeState::SawEscape => {
                self.state = if byte == CSI_BRACKET {
                    DecodeState::SawBracket
                } else {
                    trace!(byte, "dropping escape sequence without '['");
                    DecodeState::Ground
                };
                None
            }
            DecodeState::SawBracket => {
                self.state = DecodeState::Ground;
                match byte {
                    b'A' => Some(KeyEvent::ArrowUp),
                    b'B' => Some(KeyEvent::ArrowDown),
                    b'C' => Some(KeyEvent::ArrowRight),
                    b'D' => Some(KeyEvent::ArrowLeft),
                    DELETE_PREFIX => {
                        self.state = DecodeState::SawDeletePrefix;
                        None
                    }
                    other => {
                        trace!(code = other, "dropping unsupported CSI sequence");
                        None
                    }
                }
            }
            DecodeState::SawDeletePrefix => {
                self.state = DecodeState::Ground;
                if byte == DELETE_SUFFIX {
                    Some(KeyEvent::Delete)
                } else {
                    trace!(byte, "dropping malformed delete sequence");
                    None
                }
            }
        }
    }

    /// Decode one transport read.
    ///
    /// Empty chunks produce nothing. A sequence left incomplete at the end of
    /// the chunk is discarded.
    pub fn decode_chunk(&mut self, chunk: &[u8]) -> Vec<KeyEvent> {
        let events: Vec<KeyEvent> = chunk.iter().filter_map(|&byte| self.feed(byte)).collect();
        if self.is_pending() {
            trace!(state = ?self.state, "short read inside escape sequence");
            self.state = DecodeState::Ground;
        }
        events
    }

    /// Signal end-of-stream. Returns `EndOfInput` exactly once.
    pub fn finish(&mut self) -> Option<KeyEvent> {
        if self.finished {
            return None;
        }
        self.state = DecodeState::Ground;
        self.finished = true;
        Some(KeyEvent::EndOfInput)
    }
}

fn classify_ground(byte: u8) -> Option<KeyEvent> {
    match byte {
        CTRL_C => Some(KeyEvent::Interrupt),
        TAB => Some(KeyEvent::Tab),
        CR => Some(KeyEvent::Enter),
        DEL => Some(KeyEvent::Backspace),
        0x20..=0x7E => Some(KeyEvent::Printable(byte)),
        _ => None,
    }
}
