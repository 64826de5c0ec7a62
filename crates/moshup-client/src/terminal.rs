//! Terminal size detection for the session handoff.

use std::io;
use std::os::unix::io::AsRawFd;

use moshup_core::TermSize;

/// Size of the terminal on stdout, or `None` when stdout is not a terminal.
pub fn get_terminal_size() -> Option<TermSize> {
    let fd = io::stdout().as_raw_fd();

    let mut winsize = std::mem::MaybeUninit::<libc::winsize>::uninit();
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, winsize.as_mut_ptr()) };
    if result != 0 {
        return None;
    }

    let winsize = unsafe { winsize.assume_init() };
    (winsize.ws_col > 0 && winsize.ws_row > 0).then_some(TermSize {
        cols: winsize.ws_col,
        rows: winsize.ws_row,
    })
}
