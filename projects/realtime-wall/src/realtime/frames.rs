use bytes::Bytes;

const START_OF_IMAGE: [u8; 2] = [0xFF, 0xD8];
const END_OF_IMAGE: [u8; 2] = [0xFF, 0xD9];
const MAX_PENDING_BYTES: usize = 4 * 1024 * 1024;

/// Pulls complete JPEG frames out of a proxied MJPEG byte stream so the
/// latest one can be served as a still snapshot.
#[derive(Debug, Default)]
pub struct FrameTracker {
    pending: Vec<u8>,
    frames_seen: u64,
}

impl FrameTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    /// Feeds one chunk; returns the newest frame completed by it, if any.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Bytes> {
        self.pending.extend_from_slice(chunk);
        if self.pending.len() > MAX_PENDING_BYTES {
            let excess = self.pending.len() - MAX_PENDING_BYTES;
            self.pending.drain(..excess);
        }

        let mut newest = None;
        let mut consumed = 0;
        while let Some((start, end)) = next_frame(&self.pending[consumed..]) {
            newest = Some(Bytes::copy_from_slice(
                &self.pending[consumed + start..consumed + end],
            ));
            self.frames_seen += 1;
            consumed += end;
        }

        // Keep an unfinished frame, drop everything before it.
        let rest = &self.pending[consumed..];
        let keep_from = match position(rest, &START_OF_IMAGE) {
            Some(start) => consumed + start,
            None if rest.last() == Some(&START_OF_IMAGE[0]) => self.pending.len() - 1,
            None => self.pending.len(),
        };
        self.pending.drain(..keep_from);

        newest
    }
}

fn next_frame(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = position(buffer, &START_OF_IMAGE)?;
    let body = start + START_OF_IMAGE.len();
    let end = body + position(&buffer[body..], &END_OF_IMAGE)? + END_OF_IMAGE.len();
    Some((start, end))
}

fn position(buffer: &[u8], marker: &[u8; 2]) -> Option<usize> {
    buffer.windows(marker.len()).position(|window| window == marker)
}
