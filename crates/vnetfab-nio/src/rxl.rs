//! RX listener multiplexer: one shared `select`-style thread polls every
//! fd-backed NIO, while fd-less transports (FIFO, null) get a dedicated
//! thread spun up when their listener is added.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

#[cfg(unix)]
use std::os::fd::{BorrowedFd, RawFd};

#[cfg(unix)]
use polling::{Event, Events, Poller};

use crate::nio::Nio;

pub type RxHandler = Box<dyn FnMut(&str, &[u8]) + Send>;

struct Listener {
    nio: Arc<Mutex<Nio>>,
    handler: Mutex<RxHandler>,
    running: Arc<AtomicBool>,
    in_handler: Arc<AtomicBool>,
}

impl Listener {
    fn dispatch_ready_frame(&self) {
        let frame = self.nio.lock().unwrap().try_recv();
        if let Ok(Some(frame)) = frame {
            self.in_handler.store(true, Ordering::Release);
            let name = self.nio.lock().unwrap().name().to_string();
            (self.handler.lock().unwrap())(&name, &frame);
            self.in_handler.store(false, Ordering::Release);
        }
    }
}

/// Opaque handle returned by [`RxListenerMux::add`], used to remove the
/// listener later.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey(usize);

enum Slot {
    #[cfg(unix)]
    Polled { fd: RawFd, listener: Arc<Listener> },
    Dedicated { running: Arc<AtomicBool>, handle: Option<JoinHandle<()>> },
}

pub struct RxListenerMux {
    #[cfg(unix)]
    poller: Poller,
    next_key: usize,
    slots: HashMap<usize, Slot>,
}

impl RxListenerMux {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            poller: Poller::new()?,
            next_key: 0,
            slots: HashMap::new(),
        })
    }

    /// Registers a listener for `nio`. NIOs without a pollable fd (FIFO,
    /// null) get their own background thread; everything else is folded
    /// into the shared `select`-style loop driven by [`RxListenerMux::poll_once`].
    pub fn add(&mut self, nio: Arc<Mutex<Nio>>, handler: RxHandler) -> std::io::Result<ListenerKey> {
        let key = self.next_key;
        self.next_key += 1;

        let needs_dedicated = nio.lock().unwrap().needs_dedicated_thread();
        let running = Arc::new(AtomicBool::new(true));
        let listener = Arc::new(Listener {
            nio,
            handler: Mutex::new(handler),
            running: running.clone(),
            in_handler: Arc::new(AtomicBool::new(false)),
        });

        if needs_dedicated || cfg!(not(unix)) {
            let thread_listener = listener.clone();
            let handle = std::thread::spawn(move || {
                while thread_listener.running.load(Ordering::Acquire) {
                    thread_listener.dispatch_ready_frame();
                    std::thread::sleep(Duration::from_millis(2));
                }
            });
            self.slots.insert(key, Slot::Dedicated { running, handle: Some(handle) });
        } else {
            #[cfg(unix)]
            {
                let fd = listener.nio.lock().unwrap().raw_fd().expect("pollable nio must expose an fd");
                unsafe {
                    self.poller.add(fd, Event::readable(key))?;
                }
                self.slots.insert(key, Slot::Polled { fd, listener });
            }
        }

        Ok(ListenerKey(key))
    }

    /// Runs one pass: waits (with `timeout`, or forever if `None`) for
    /// readiness, then dispatches every fd whose NIO handed back a frame.
    /// Dedicated-thread listeners run independently and aren't touched
    /// here.
    #[cfg(unix)]
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> std::io::Result<()> {
        let mut events = Events::new();
        self.poller.wait(&mut events, timeout)?;
        for event in events.iter() {
            if let Some(Slot::Polled { fd, listener }) = self.slots.get(&event.key) {
                if listener.running.load(Ordering::Acquire) {
                    listener.dispatch_ready_frame();
                }
                self.poller.modify(
                    unsafe { BorrowedFd::borrow_raw(*fd) },
                    Event::readable(event.key),
                )?;
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn poll_once(&mut self, _timeout: Option<Duration>) -> std::io::Result<()> {
        Ok(())
    }

    /// Marks the listener for removal and blocks until no handler
    /// invocation is in flight — after this returns, the handler is
    /// guaranteed never to run again.
    pub fn remove(&mut self, key: ListenerKey) {
        match self.slots.remove(&key.0) {
            #[cfg(unix)]
            Some(Slot::Polled { fd, listener }) => {
                listener.running.store(false, Ordering::Release);
                while listener.in_handler.load(Ordering::Acquire) {
                    std::thread::yield_now();
                }
                let _ = self.poller.delete(unsafe { BorrowedFd::borrow_raw(fd) });
            }
            Some(Slot::Dedicated { running, handle }) => {
                running.store(false, Ordering::Release);
                if let Some(handle) = handle {
                    let _ = handle.join();
                }
            }
            #[cfg(not(unix))]
            _ => {}
            None => {}
        }
    }
}
