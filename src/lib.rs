//! Bounded CSP channels and a randomly-fair multi-way select for threads.
//!
//! Every [`Channel`] and [`Select`] belongs to a [`Runtime`], which owns the one
//! lock guarding all of their state. A thread blocked in `send`, `receive` or
//! `select` parks on a private condition variable until a peer matches it, a
//! channel it waits on is closed, or another thread interrupts it through an
//! [`Interrupter`].
//!
//! ```
//! use std::thread;
//! use csp_channel::Runtime;
//!
//! let rt = Runtime::new();
//! let chan = rt.channel::<u32>(0).unwrap();
//!
//! let producer = {
//!     let chan = chan.clone();
//!     thread::spawn(move || {
//!         for i in 0..3 {
//!             chan.send(i).unwrap();
//!         }
//!         chan.close();
//!     })
//! };
//!
//! assert_eq!(chan.iter().collect::<Vec<_>>(), vec![0, 1, 2]);
//! producer.join().unwrap();
//! ```

// array 有界channel（容量为0时是rendezvous channel）
// context 线程的等待上下文，负责多channel的登记、配对和摘除
// waker 通道中被阻塞线程的等待队列
// select 多路select
// lock 全局协调锁
pub mod mpmc;

pub use mpmc::{
    Channel, Config, ConfigError, IllegalState, Interrupter, Iter, Received, RecvError, Runtime,
    Select, SelectError, SendError, TrySendError, UsageError,
};
