mod mjpeg;

pub use mjpeg::{MjpegStream, StreamError};
