use std::fmt;

use thiserror::Error;

// send方法可能返回的错误
// 原始信息被包含在错误中，因此它能够被恢复，无论哪种情况信息都没有被交付
#[derive(Error, PartialEq, Eq, Clone, Copy)]
pub enum SendError<T> {
    // channel已经关闭（发送前或阻塞期间），信息不能被发送
    #[error("sending on a closed channel")]
    Closed(T),
    // 阻塞期间被中断，信息没有交给任何接收者
    #[error("send interrupted while parked")]
    Interrupted(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SendError::Closed(msg) | SendError::Interrupted(msg) => msg,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SendError::Closed(_))
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed(..) => f.pad("Closed(..)"),
            SendError::Interrupted(..) => f.pad("Interrupted(..)"),
        }
    }
}

// try_send错误
#[derive(Error, PartialEq, Eq, Clone, Copy)]
pub enum TrySendError<T> {
    // 没有等待的接收者并且缓冲区已满，发送会阻塞
    #[error("sending on a full channel")]
    Full(T),
    #[error("sending on a closed channel")]
    Closed(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(msg) | TrySendError::Closed(msg) => msg,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, TrySendError::Full(_))
    }

    pub(crate) fn map<U>(self, f: impl FnOnce(T) -> U) -> TrySendError<U> {
        match self {
            TrySendError::Full(msg) => TrySendError::Full(f(msg)),
            TrySendError::Closed(msg) => TrySendError::Closed(f(msg)),
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(..) => f.pad("Full(..)"),
            TrySendError::Closed(..) => f.pad("Closed(..)"),
        }
    }
}

// 接收永远不会因为channel关闭而失败（关闭后返回终止值），只会被中断
#[derive(Error, PartialEq, Eq, Clone, Copy, Debug)]
pub enum RecvError {
    #[error("receive interrupted while parked")]
    Interrupted,
}

/// Invalid construction or API sequencing.
#[derive(Error, PartialEq, Eq, Clone, Copy, Debug)]
pub enum UsageError {
    #[error("channel capacity {requested} exceeds the configured maximum {max}")]
    CapacityTooLarge { requested: usize, max: usize },
    #[error("select branch {index} uses a channel created by another runtime")]
    ForeignChannel { index: usize },
    #[error("the last select did not resolve on a receive branch")]
    NoReceive,
    #[error("select data requested with the wrong element type")]
    DataType,
}

#[derive(Error, PartialEq, Eq, Clone, Copy, Debug)]
pub enum SelectError {
    // 被选中的send分支指向一个已关闭的channel
    #[error("select chose send branch {index} on a closed channel")]
    Closed { index: usize },
    #[error("select interrupted while parked")]
    Interrupted,
    #[error(transparent)]
    Usage(#[from] UsageError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid runtime config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Internal invariant violation. Never recoverable.
#[derive(Error, PartialEq, Eq, Clone, Copy, Debug)]
#[error("illegal state: {0}")]
pub struct IllegalState(pub &'static str);

#[cold]
#[track_caller]
pub(crate) fn illegal_state(what: &'static str) -> ! {
    let err = IllegalState(what);
    log::error!("{}", err);
    panic!("{}", err)
}
