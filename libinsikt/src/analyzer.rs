use crate::error::Error;
use crate::frame::Frame;

/// Common trait for consumers of captured frames
///
/// Frame sources (pcap files, live interfaces) call `handle_frame` once per
/// frame, in capture order.
pub trait FrameAnalyzer {
    /// Initialization function, called before the first frame (optional)
    fn init(&mut self) -> Result<(), Error> {
        Ok(())
    }

    /// Callback function for every captured frame. An error stops the frame source.
    fn handle_frame(&mut self, frame: &Frame) -> Result<(), Error>;

    /// Teardown function, called after the last frame (optional)
    fn teardown(&mut self) {}
}

impl<A: FrameAnalyzer + ?Sized> FrameAnalyzer for &mut A {
    fn init(&mut self) -> Result<(), Error> {
        (**self).init()
    }

    fn handle_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        (**self).handle_frame(frame)
    }

    fn teardown(&mut self) {
        (**self).teardown()
    }
}
