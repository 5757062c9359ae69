//! Transport contract and the shared transport slot.

use std::cell::{RefCell, RefMut};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::rc::Rc;

/// A byte-oriented, bidirectional, reliable stream.
///
/// Reads may be short; the link loops internally until a field is
/// complete. Writes must either complete fully or fail (the link uses
/// `write_all` semantics, so a short write surfaces as an error). `close`
/// is invoked at most once per installed transport, after any read or
/// write failure or an explicit close.
pub trait Transport: Read + Write {
    fn close(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// Shared handle to the one transport slot behind an Rx/Tx pair.
///
/// The slot is the single close state: taking the transport out closes
/// it exactly once, and every handle observes the poisoned (empty) slot
/// until a new transport is installed.
pub(crate) struct SharedTransport<T: Transport> {
    slot: Rc<RefCell<Option<T>>>,
}

impl<T: Transport> Clone for SharedTransport<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T: Transport> SharedTransport<T> {
    pub(crate) fn new(transport: T) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Some(transport))),
        }
    }

    pub(crate) fn set(&self, transport: T) {
        *self.slot.borrow_mut() = Some(transport);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.slot.borrow().is_none()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, Option<T>> {
        self.slot.borrow_mut()
    }

    /// Close and clear the slot. A no-op when already closed.
    pub(crate) fn close(&self) -> io::Result<()> {
        match self.slot.borrow_mut().take() {
            Some(mut transport) => {
                log::debug!("closing transport");
                transport.close()
            }
            None => Ok(()),
        }
    }
}
