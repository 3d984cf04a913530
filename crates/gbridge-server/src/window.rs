//! Opening browser windows from the controller.

use std::io;

/// Opens a URL in a new window.
pub trait WindowOpener: Send + Sync {
    fn open(&self, url: &str) -> io::Result<()>;
}

/// Hands URLs to the desktop's default handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl WindowOpener for SystemOpener {
    fn open(&self, url: &str) -> io::Result<()> {
        open::that(url)
    }
}
