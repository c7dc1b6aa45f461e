use thiserror::Error;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Upper bound on one buffered JPEG part. A stream that never terminates a
/// part is treated as a read failure rather than growing without bound.
const MAX_PART_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("jpeg part exceeded {} bytes without terminating", MAX_PART_BYTES)]
    OversizedPart,
}

/// Pull-based MJPEG-over-HTTP stream. Devices serve a continuous
/// `multipart/x-mixed-replace` body of JPEG parts; frames are recovered by
/// SOI/EOI scanning so arbitrary chunk boundaries are tolerated.
pub struct MjpegStream {
    response: reqwest::Response,
    extractor: FrameExtractor,
}

impl MjpegStream {
    pub async fn open(client: &reqwest::Client, url: &str) -> Result<Self, StreamError> {
        let response = client.get(url).send().await?.error_for_status()?;
        Ok(Self {
            response,
            extractor: FrameExtractor::new(),
        })
    }

    /// Next complete JPEG frame; `Ok(None)` when the stream ends.
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>, StreamError> {
        loop {
            if let Some(frame) = self.extractor.next_frame() {
                return Ok(Some(frame));
            }
            if self.extractor.buffered() > MAX_PART_BYTES {
                return Err(StreamError::OversizedPart);
            }
            match self.response.chunk().await? {
                Some(chunk) => self.extractor.push(&chunk),
                None => return Ok(None),
            }
        }
    }
}

/// Reassembles JPEG frames from an arbitrary byte stream. Bytes before the
/// next SOI marker (multipart boundaries, part headers) are discarded.
struct FrameExtractor {
    buf: Vec<u8>,
}

impl FrameExtractor {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn next_frame(&mut self) -> Option<Vec<u8>> {
        let start = find_marker(&self.buf, &SOI)?;
        if start > 0 {
            self.buf.drain(..start);
        }

        // Search after the SOI marker so back-to-back markers don't match.
        let end = find_marker(&self.buf[2..], &EOI)? + 2;
        let frame = self.buf[..end + 2].to_vec();
        self.buf.drain(..end + 2);
        Some(frame)
    }
}

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg(payload: &[u8]) -> Vec<u8> {
        let mut frame = SOI.to_vec();
        frame.extend_from_slice(payload);
        frame.extend_from_slice(&EOI);
        frame
    }

    #[test]
    fn extracts_a_frame_split_across_chunks() {
        let frame = jpeg(b"abcdef");
        let mut extractor = FrameExtractor::new();

        extractor.push(&frame[..3]);
        assert!(extractor.next_frame().is_none());
        extractor.push(&frame[3..]);
        assert_eq!(extractor.next_frame().unwrap(), frame);
        assert!(extractor.next_frame().is_none());
    }

    #[test]
    fn skips_multipart_headers_between_frames() {
        let first = jpeg(b"one");
        let second = jpeg(b"two");
        let mut bytes = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        bytes.extend_from_slice(&first);
        bytes.extend_from_slice(b"\r\n--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        bytes.extend_from_slice(&second);

        let mut extractor = FrameExtractor::new();
        extractor.push(&bytes);
        assert_eq!(extractor.next_frame().unwrap(), first);
        assert_eq!(extractor.next_frame().unwrap(), second);
        assert!(extractor.next_frame().is_none());
    }

    #[test]
    fn incomplete_trailing_frame_stays_buffered() {
        let frame = jpeg(b"payload");
        let mut extractor = FrameExtractor::new();
        extractor.push(&frame);
        extractor.push(&SOI);
        extractor.push(b"partial");

        assert_eq!(extractor.next_frame().unwrap(), frame);
        assert!(extractor.next_frame().is_none());
        assert_eq!(extractor.buffered(), 2 + b"partial".len());
    }
}
