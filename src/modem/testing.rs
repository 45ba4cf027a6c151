use crate::modem::transport::Transport;
use std::collections::VecDeque;
use std::io;
use std::time::Duration;

enum Script {
    // Bytes the modem emits once the next frame is written.
    Reply(Vec<Result<u8, io::ErrorKind>>),
    // Bytes that show up on their own once the line has gone quiet.
    Arrive(Vec<Result<u8, io::ErrorKind>>),
    WriteError(io::ErrorKind),
    ShortWrite(usize),
}

// In-memory modem: replays scripted output in order and records every frame written.
// An empty inbound queue reads as a timeout, so tests never block.
#[derive(Default)]
pub struct ScriptedTransport {
    script: VecDeque<Script>,
    inbound: VecDeque<Result<u8, io::ErrorKind>>,
    frames: Vec<Vec<u8>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.script.push_back(Script::Reply(to_items(bytes.as_ref())));
        self
    }

    pub fn arrive(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.script.push_back(Script::Arrive(to_items(bytes.as_ref())));
        self
    }

    pub fn fail_write(mut self, kind: io::ErrorKind) -> Self {
        self.script.push_back(Script::WriteError(kind));
        self
    }

    pub fn short_write(mut self, written: usize) -> Self {
        self.script.push_back(Script::ShortWrite(written));
        self
    }

    // Appends a read failure after the most recently scripted output.
    pub fn fail_read(mut self, kind: io::ErrorKind) -> Self {
        match self.script.back_mut() {
            Some(Script::Reply(items)) | Some(Script::Arrive(items)) => items.push(Err(kind)),
            _ => self.script.push_back(Script::Arrive(vec![Err(kind)])),
        }
        self
    }

    pub fn with_inbound(mut self, bytes: impl AsRef<[u8]>) -> Self {
        self.inbound.extend(to_items(bytes.as_ref()));
        self
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.clone()
    }

    pub fn frames_as_text(&self) -> Vec<String> {
        self.frames
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .collect()
    }

    pub fn unread(&self) -> usize {
        self.inbound.len()
    }

    pub fn script_exhausted(&self) -> bool {
        self.script.is_empty()
    }
}

impl Transport for ScriptedTransport {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        match self.script.front() {
            Some(Script::WriteError(kind)) => {
                let kind = *kind;
                self.script.pop_front();
                return Err(io::Error::from(kind));
            }
            Some(Script::ShortWrite(written)) => {
                let written = (*written).min(bytes.len());
                self.script.pop_front();
                self.frames.push(bytes[..written].to_vec());
                return Ok(written);
            }
            Some(Script::Reply(_)) => {
                if let Some(Script::Reply(items)) = self.script.pop_front() {
                    self.inbound.extend(items);
                }
            }
            Some(Script::Arrive(_)) | None => {}
        }
        self.frames.push(bytes.to_vec());
        Ok(bytes.len())
    }

    fn read_byte(&mut self, _timeout: Duration) -> io::Result<u8> {
        if self.inbound.is_empty() && matches!(self.script.front(), Some(Script::Arrive(_))) {
            if let Some(Script::Arrive(items)) = self.script.pop_front() {
                self.inbound.extend(items);
            }
        }
        match self.inbound.pop_front() {
            Some(Ok(byte)) => Ok(byte),
            Some(Err(kind)) => Err(io::Error::from(kind)),
            None => Err(io::Error::from(io::ErrorKind::TimedOut)),
        }
    }
}

fn to_items(bytes: &[u8]) -> Vec<Result<u8, io::ErrorKind>> {
    bytes.iter().copied().map(Ok).collect()
}
