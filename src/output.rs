use std::cell::RefCell;
use std::fmt;
use std::io;
use std::rc::Rc;

/// An in-memory output sink. Clones share the buffer, so one clone can be
/// handed to the interpreter and another kept to read what was printed.
#[derive(Debug, Clone, Default)]
pub struct CaptureOutput {
    into: Rc<RefCell<Vec<u8>>>,
}

impl CaptureOutput {
    pub fn new() -> CaptureOutput {
        CaptureOutput::default()
    }
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.into.borrow()).into_owned()
    }
    pub fn clear(&self) {
        self.into.borrow_mut().clear();
    }
}

impl io::Write for CaptureOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.into.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Display for CaptureOutput {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.contents())
    }
}
