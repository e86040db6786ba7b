mod array;
mod config;
mod context;
mod errors;
mod lock;
mod select;
mod waker;

use std::{fmt, sync::Arc};

pub use array::Received;
pub use config::Config;
pub use context::Interrupter;
pub use errors::{
    ConfigError, IllegalState, RecvError, SelectError, SendError, TrySendError, UsageError,
};
pub use select::Select;

use context::Context;
use lock::Shared;
use waker::Port;

/// Owner of the coordination lock shared by every channel and select created
/// through it. Cloning is cheap and yields a handle to the same runtime.
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<Shared>,
}

impl Runtime {
    pub fn new() -> Runtime {
        Runtime::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Runtime {
        Runtime {
            shared: Arc::new(Shared::new(config)),
        }
    }

    pub fn config(&self) -> &Config {
        self.shared.config()
    }

    // 创建容量为capacity的channel
    // capacity为0时是rendezvous channel，发送和接收必须直接配对
    pub fn channel<T: Send + 'static>(&self, capacity: usize) -> Result<Channel<T>, UsageError> {
        if let Some(max) = self.config().max_capacity {
            if capacity > max {
                return Err(UsageError::CapacityTooLarge {
                    requested: capacity,
                    max,
                });
            }
        }
        Ok(Channel {
            chan: Arc::new(array::Channel::new(self.shared.clone(), capacity)),
        })
    }

    pub fn select(&self) -> Select {
        Select::new(self.shared.clone())
    }

    /// Returns a handle that interrupts the calling thread's blocking
    /// operations on this runtime. Hand it to another thread.
    pub fn interrupter(&self) -> Interrupter {
        Interrupter::new(self.shared.clone(), Context::current(&self.shared))
    }

    /// Clears a pending interrupt of the calling thread, returning whether
    /// there was one.
    pub fn take_interrupt(&self) -> bool {
        let cx = Context::current(&self.shared);
        let mut g = self.shared.lock();
        cx.take_interrupt(&mut g)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.shared.id())
            .finish()
    }
}

/// A bounded FIFO channel. Clones refer to the same channel.
pub struct Channel<T> {
    chan: Arc<array::Channel<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            chan: self.chan.clone(),
        }
    }
}

impl<T: Send + 'static> Channel<T> {
    // 向channel写入msg(blocking)，直到msg被接收者取走或者放入缓冲区
    // channel已关闭或在阻塞期间被关闭时，包裹原msg返回Closed
    pub fn send(&self, msg: T) -> Result<(), SendError<T>> {
        self.chan.send(msg)
    }

    // 尝试向channel发送信息(non-blocking)
    // 没有等待的接收者并且缓冲区已满时返回Full
    pub fn try_send(&self, msg: T) -> Result<(), TrySendError<T>> {
        let mut g = self.chan.shared().lock();
        self.chan.try_send(&mut g, msg)
    }

    /// Receives the next value, or the terminal value once the channel is
    /// closed and drained (`None` if it was closed without one).
    pub fn receive(&self) -> Result<Option<T>, RecvError> {
        self.chan.recv().map(Received::into_value)
    }

    pub fn receive_with_result(&self) -> Result<Received<T>, RecvError> {
        self.chan.recv()
    }

    // 尝试接收(non-blocking)，None代表没有数据并且channel没有关闭
    pub fn try_receive(&self) -> Option<Received<T>> {
        let mut g = self.chan.shared().lock();
        self.chan.try_recv(&mut g)
    }

    // 关闭channel，重复调用没有效果
    pub fn close(&self) {
        self.chan.close(None);
    }

    /// Closes the channel; every receive after the buffered values are
    /// drained yields a clone of `terminal`.
    pub fn close_with(&self, terminal: T)
    where
        T: Clone,
    {
        self.chan.close(Some(Box::new(move || terminal.clone())));
    }

    // 只计入缓冲区中的信息，阻塞中的sender持有的信息不算
    pub fn len(&self) -> usize {
        self.chan.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.chan.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.chan.is_closed()
    }

    pub fn same_channel(&self, other: &Channel<T>) -> bool {
        Arc::ptr_eq(&self.chan, &other.chan)
    }

    /// Iterates over received values until the channel is closed and drained
    /// (or the thread is interrupted).
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { chan: self }
    }

    pub(crate) fn port(&self) -> Arc<dyn Port> {
        self.chan.clone()
    }

    #[cfg(test)]
    pub(crate) fn inner(&self) -> &array::Channel<T> {
        &self.chan
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("Channel { .. }")
    }
}

pub struct Iter<'a, T> {
    chan: &'a Channel<T>,
}

impl<T: Send + 'static> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        match self.chan.receive_with_result() {
            Ok(Received { value, ok: true }) => value,
            _ => None,
        }
    }
}

impl<'a, T: Send + 'static> IntoIterator for &'a Channel<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}
